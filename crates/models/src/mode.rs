//! Train/eval switching with scoped restoration.
//!
//! Modules whose forward pass depends on the phase (dropout in the classifiers)
//! implement [`ModeSwitch`]. Callers that need a temporary phase change hold a
//! [`ModeGuard`], which puts the previous mode back when it is dropped, including
//! when the holder returns early through `?` or unwinds.

use std::ops::{Deref, DerefMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Train,
    Eval,
}

pub trait ModeSwitch {
    fn mode(&self) -> Mode;
    fn set_mode(&mut self, mode: Mode);
}

/// Exclusive borrow of a [`ModeSwitch`] target held in `mode` until drop.
pub struct ModeGuard<'a, T: ModeSwitch + ?Sized> {
    target: &'a mut T,
    previous: Mode,
}

impl<'a, T: ModeSwitch + ?Sized> ModeGuard<'a, T> {
    pub fn enter(target: &'a mut T, mode: Mode) -> Self {
        let previous = target.mode();
        target.set_mode(mode);
        Self { target, previous }
    }

    pub fn eval(target: &'a mut T) -> Self {
        Self::enter(target, Mode::Eval)
    }
}

impl<T: ModeSwitch + ?Sized> Deref for ModeGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.target
    }
}

impl<T: ModeSwitch + ?Sized> DerefMut for ModeGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.target
    }
}

impl<T: ModeSwitch + ?Sized> Drop for ModeGuard<'_, T> {
    fn drop(&mut self) {
        self.target.set_mode(self.previous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Toggle {
        mode: Mode,
        switches: usize,
    }

    impl ModeSwitch for Toggle {
        fn mode(&self) -> Mode {
            self.mode
        }

        fn set_mode(&mut self, mode: Mode) {
            self.mode = mode;
            self.switches += 1;
        }
    }

    fn failing_eval(toggle: &mut Toggle) -> Result<(), &'static str> {
        let guard = ModeGuard::eval(toggle);
        assert_eq!(guard.mode(), Mode::Eval);
        Err("bail out while guarded")
    }

    #[test]
    fn restores_previous_mode_on_drop() {
        let mut toggle = Toggle::default();
        {
            let guard = ModeGuard::eval(&mut toggle);
            assert_eq!(guard.mode(), Mode::Eval);
        }
        assert_eq!(toggle.mode, Mode::Train);
        assert_eq!(toggle.switches, 2);
    }

    #[test]
    fn restores_on_error_path() {
        let mut toggle = Toggle::default();
        assert!(failing_eval(&mut toggle).is_err());
        assert_eq!(toggle.mode, Mode::Train);
    }

    #[test]
    fn restores_on_unwind() {
        let mut toggle = Toggle::default();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = ModeGuard::eval(&mut toggle);
            panic!("forward blew up");
        }));
        assert!(result.is_err());
        assert_eq!(toggle.mode, Mode::Train);
    }

    #[test]
    fn nested_guards_unwind_in_order() {
        let mut toggle = Toggle {
            mode: Mode::Eval,
            switches: 0,
        };
        {
            let mut outer = ModeGuard::enter(&mut toggle, Mode::Train);
            {
                let inner = ModeGuard::eval(&mut *outer);
                assert_eq!(inner.mode(), Mode::Eval);
            }
            assert_eq!(outer.mode(), Mode::Train);
        }
        assert_eq!(toggle.mode, Mode::Eval);
    }
}
