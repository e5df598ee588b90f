//! Checkpoint persistence for the trainer.
//!
//! A run directory holds one parameter bundle per model pair, keyed by the
//! 1-based iteration (`gen_00001000.bin`), a single `optimizer.bin` with three
//! slots, and a `manifest_<iteration>.json` describing the save. Every file is
//! written to a `.partial` sibling and renamed into place.
//!
//! Resume takes the newest manifest whose files still verify. `optimizer.bin` is
//! shared between saves, so a manifest whose optimizer checksum no longer
//! matches has been superseded and the next older one is tried. When no manifest
//! is left the newest bundle file names decide the iteration.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use burn::module::Module;
use burn::optim::Optimizer;
use burn::record::{BinBytesRecorder, FullPrecisionSettings, Record, Recorder};
use burn::tensor::backend::{AutodiffBackend, Backend};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{TrainError, TrainResult};
use crate::schedule::Schedule;
use crate::trainer::{OptimRecord, Trainer};

const GEN_PREFIX: &str = "gen";
const DIS_PREFIX: &str = "dis";
const CLS_PREFIX: &str = "cls";
const OPTIMIZER_STEM: &str = "optimizer";
const MANIFEST_PREFIX: &str = "manifest";
const BUNDLE_EXT: &str = "bin";
const PARTIAL_EXT: &str = "partial";
/// Slots in `optimizer.bin`: generator, discriminator, classifier.
const OPTIMIZER_SLOTS: usize = 3;

type BytesRecorder = BinBytesRecorder<FullPrecisionSettings>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CheckpointSchemaVersion {
    V1,
}

/// A file written by a save and the SHA-256 of its bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestEntry {
    pub file: String,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestFiles {
    pub gen: ManifestEntry,
    pub dis: ManifestEntry,
    pub cls: ManifestEntry,
    pub optimizer: ManifestEntry,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointManifest {
    pub schema_version: CheckpointSchemaVersion,
    /// 1-based iteration the bundles are keyed by.
    pub iteration: u64,
    pub saved_at_unix: f64,
    pub files: ManifestFiles,
}

impl CheckpointManifest {
    pub fn validate(&self) -> Result<(), String> {
        if self.iteration == 0 {
            return Err("iteration must be at least 1".into());
        }
        if self.saved_at_unix.is_nan() || self.saved_at_unix < 0.0 {
            return Err("saved_at_unix must be non-negative".into());
        }
        for (prefix, entry) in [
            (GEN_PREFIX, &self.files.gen),
            (DIS_PREFIX, &self.files.dis),
            (CLS_PREFIX, &self.files.cls),
        ] {
            if entry.file != bundle_name(prefix, self.iteration) {
                return Err(format!(
                    "{prefix} bundle {} does not match iteration {}",
                    entry.file, self.iteration
                ));
            }
        }
        let all = [
            &self.files.gen,
            &self.files.dis,
            &self.files.cls,
            &self.files.optimizer,
        ];
        if let Some(entry) = all
            .iter()
            .find(|e| e.sha256.len() != 64 || !e.sha256.bytes().all(|b| b.is_ascii_hexdigit()))
        {
            return Err(format!("{} has a malformed sha256", entry.file));
        }
        Ok(())
    }
}

/// Where a resumed iteration number came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeSource {
    Manifest(PathBuf),
    /// No manifest; parsed from the newest generator bundle name.
    Filename(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeReport {
    pub iteration: u64,
    pub source: ResumeSource,
    /// Always false: the classifier slot of `optimizer.bin` is loaded into the
    /// discriminator optimizer after the discriminator slot, and the classifier
    /// optimizer keeps its fresh state.
    pub classifier_optimizer_restored: bool,
}

/// Sorted parameter ids each optimizer holds Adam moments for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptimizerStateIds {
    pub gen: Vec<u64>,
    pub dis: Vec<u64>,
    pub cls: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SavedCheckpoint {
    pub iteration: u64,
    pub manifest_path: PathBuf,
    pub manifest: CheckpointManifest,
}

pub fn bundle_name(prefix: &str, iteration: u64) -> String {
    format!("{prefix}_{iteration:08}.{BUNDLE_EXT}")
}

pub fn manifest_name(iteration: u64) -> String {
    format!("{MANIFEST_PREFIX}_{iteration:08}.json")
}

/// Iteration encoded in the last eight characters of a file stem, e.g.
/// `gen_00001000.bin` -> 1000.
pub fn parse_iteration(path: &Path) -> TrainResult<u64> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| TrainError::CheckpointName(path.to_path_buf()))?;
    let digits = stem
        .len()
        .checked_sub(8)
        .and_then(|start| stem.get(start..))
        .filter(|d| d.bytes().all(|b| b.is_ascii_digit()))
        .ok_or_else(|| TrainError::CheckpointName(path.to_path_buf()))?;
    digits
        .parse()
        .map_err(|_| TrainError::CheckpointName(path.to_path_buf()))
}

/// `{prefix}_*.{ext}` files in `dir`, sorted by name. A missing directory is empty.
fn sorted_files(dir: &Path, prefix: &str, ext: &str) -> TrainResult<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(TrainError::io(dir)(err)),
    };
    let head = format!("{prefix}_");
    let tail = format!(".{ext}");
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| name.starts_with(&head) && name.ends_with(&tail))
        .collect();
    names.sort();
    Ok(names.into_iter().map(|name| dir.join(name)).collect())
}

/// Lexicographically last `{prefix}_*.{ext}` file in `dir`.
pub fn find_latest(dir: &Path, prefix: &'static str, ext: &str) -> TrainResult<PathBuf> {
    sorted_files(dir, prefix, ext)?
        .pop()
        .ok_or_else(|| TrainError::CheckpointNotFound {
            dir: dir.to_path_buf(),
            prefix,
        })
}

fn sha256_file(path: &Path) -> TrainResult<String> {
    let bytes = fs::read(path).map_err(TrainError::io(path))?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

fn entry(dir: &Path, file: String) -> TrainResult<ManifestEntry> {
    let sha256 = sha256_file(&dir.join(&file))?;
    Ok(ManifestEntry { file, sha256 })
}

fn write_atomic(path: &Path, bytes: &[u8]) -> TrainResult<()> {
    let partial = path.with_extension(PARTIAL_EXT);
    fs::write(&partial, bytes).map_err(TrainError::io(&partial))?;
    fs::rename(&partial, path).map_err(TrainError::io(path))
}

fn write_record<B: Backend, R: Record<B>>(record: R, path: &Path) -> TrainResult<()> {
    let bytes = Recorder::<B>::record(&BytesRecorder::default(), record, ())
        .map_err(TrainError::recorder(path))?;
    write_atomic(path, &bytes)
}

fn read_record<B: Backend, R: Record<B>>(path: &Path, device: &B::Device) -> TrainResult<R> {
    let bytes = fs::read(path).map_err(TrainError::io(path))?;
    Recorder::<B>::load(&BytesRecorder::default(), bytes, device).map_err(TrainError::recorder(path))
}

fn load_module<B: Backend, M: Module<B>>(module: M, path: &Path, device: &B::Device) -> TrainResult<M> {
    let record = read_record::<B, M::Record>(path, device)?;
    Ok(module.load_record(record))
}

fn verify(dir: &Path, prefix: &'static str, entry: &ManifestEntry) -> TrainResult<PathBuf> {
    let path = dir.join(&entry.file);
    if !path.exists() {
        return Err(TrainError::CheckpointNotFound {
            dir: dir.to_path_buf(),
            prefix,
        });
    }
    let actual = sha256_file(&path)?;
    if actual != entry.sha256 {
        return Err(TrainError::ChecksumMismatch {
            path,
            expected: entry.sha256.clone(),
            actual,
        });
    }
    Ok(path)
}

fn read_manifest(path: &Path) -> TrainResult<CheckpointManifest> {
    let text = fs::read_to_string(path).map_err(TrainError::io(path))?;
    let manifest: CheckpointManifest =
        serde_json::from_str(&text).map_err(|source| TrainError::Manifest {
            path: path.to_path_buf(),
            source,
        })?;
    manifest
        .validate()
        .map_err(|reason| TrainError::ManifestInvalid {
            path: path.to_path_buf(),
            reason,
        })?;
    Ok(manifest)
}

/// Paths of the three parameter bundles plus the iteration they encode.
struct Located {
    iteration: u64,
    gen: PathBuf,
    dis: PathBuf,
    cls: PathBuf,
    source: ResumeSource,
}

fn locate(dir: &Path) -> TrainResult<Located> {
    for manifest_path in sorted_files(dir, MANIFEST_PREFIX, "json")?.into_iter().rev() {
        let manifest = read_manifest(&manifest_path)?;
        match verify(dir, OPTIMIZER_STEM, &manifest.files.optimizer) {
            Ok(_) => {}
            Err(TrainError::ChecksumMismatch { .. }) => {
                tracing::warn!(
                    manifest = %manifest_path.display(),
                    "optimizer bundle rewritten by a later save; trying an older manifest"
                );
                continue;
            }
            Err(err) => return Err(err),
        }
        return Ok(Located {
            iteration: manifest.iteration,
            gen: verify(dir, GEN_PREFIX, &manifest.files.gen)?,
            dis: verify(dir, DIS_PREFIX, &manifest.files.dis)?,
            cls: verify(dir, CLS_PREFIX, &manifest.files.cls)?,
            source: ResumeSource::Manifest(manifest_path),
        });
    }
    let gen = find_latest(dir, GEN_PREFIX, BUNDLE_EXT)?;
    let dis = find_latest(dir, DIS_PREFIX, BUNDLE_EXT)?;
    let cls = find_latest(dir, CLS_PREFIX, BUNDLE_EXT)?;
    Ok(Located {
        iteration: parse_iteration(&gen)?,
        source: ResumeSource::Filename(gen.clone()),
        gen,
        dis,
        cls,
    })
}

impl<B: AutodiffBackend> Trainer<B> {
    /// Save all three pairs and the optimizer bundle after iteration `iteration`
    /// (0-based). Files are keyed by `iteration + 1`; the manifest goes last.
    pub fn save(&self, dir: impl AsRef<Path>, iteration: u64) -> TrainResult<SavedCheckpoint> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(TrainError::io(dir))?;
        let keyed = iteration + 1;

        let gen_name = bundle_name(GEN_PREFIX, keyed);
        let dis_name = bundle_name(DIS_PREFIX, keyed);
        let cls_name = bundle_name(CLS_PREFIX, keyed);
        write_record::<B, _>(self.generators.clone().into_record(), &dir.join(&gen_name))?;
        write_record::<B, _>(self.discriminators.clone().into_record(), &dir.join(&dis_name))?;
        write_record::<B, _>(self.classifiers.clone().into_record(), &dir.join(&cls_name))?;

        let optimizer_name = format!("{OPTIMIZER_STEM}.{BUNDLE_EXT}");
        let slots: Vec<OptimRecord<B>> = vec![
            self.gen_opt.to_record(),
            self.dis_opt.to_record(),
            self.cls_opt.to_record(),
        ];
        write_record::<B, _>(slots, &dir.join(&optimizer_name))?;

        let saved_at_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        let manifest = CheckpointManifest {
            schema_version: CheckpointSchemaVersion::V1,
            iteration: keyed,
            saved_at_unix,
            files: ManifestFiles {
                gen: entry(dir, gen_name)?,
                dis: entry(dir, dis_name)?,
                cls: entry(dir, cls_name)?,
                optimizer: entry(dir, optimizer_name)?,
            },
        };
        let manifest_path = dir.join(manifest_name(keyed));
        let json = serde_json::to_string_pretty(&manifest).map_err(|source| TrainError::Manifest {
            path: manifest_path.clone(),
            source,
        })?;
        write_atomic(&manifest_path, json.as_bytes())?;

        tracing::info!(iteration = keyed, dir = %dir.display(), "checkpoint saved");
        Ok(SavedCheckpoint {
            iteration: keyed,
            manifest_path,
            manifest,
        })
    }

    /// Restore the newest consistent checkpoint in `dir` and re-anchor the
    /// generator and discriminator schedules at the recovered iteration.
    ///
    /// Nothing is replaced unless every file loads.
    pub fn resume(&mut self, dir: impl AsRef<Path>) -> TrainResult<ResumeReport> {
        let dir = dir.as_ref();
        let located = locate(dir)?;
        let optimizer_path = dir.join(format!("{OPTIMIZER_STEM}.{BUNDLE_EXT}"));
        if !optimizer_path.exists() {
            return Err(TrainError::CheckpointNotFound {
                dir: dir.to_path_buf(),
                prefix: OPTIMIZER_STEM,
            });
        }

        let generators = load_module::<B, _>(self.generators.clone(), &located.gen, &self.device)?;
        let discriminators = load_module::<B, _>(self.discriminators.clone(), &located.dis, &self.device)?;
        let classifiers = load_module::<B, _>(self.classifiers.clone(), &located.cls, &self.device)?;
        let slots: Vec<OptimRecord<B>> = read_record::<B, _>(&optimizer_path, &self.device)?;
        if slots.len() < OPTIMIZER_SLOTS {
            return Err(TrainError::OptimizerBundle {
                path: optimizer_path,
                found: slots.len(),
                expected: OPTIMIZER_SLOTS,
            });
        }
        let iteration = located.iteration;
        let schedule = self.config.schedule();
        let gen_schedule = Schedule::resume_at(self.config.lr_g, schedule, iteration)?;
        let dis_schedule = Schedule::resume_at(self.config.lr_d, schedule, iteration)?;

        self.generators = generators;
        self.discriminators = discriminators;
        self.classifiers = classifiers;
        let mut slots = slots.into_iter();
        if let (Some(gen), Some(dis), Some(cls)) = (slots.next(), slots.next(), slots.next()) {
            self.gen_opt = self.gen_opt.clone().load_record(gen);
            self.dis_opt = self.dis_opt.clone().load_record(dis);
            // The classifier slot overwrites the discriminator optimizer.
            self.dis_opt = self.dis_opt.clone().load_record(cls);
        }
        self.gen_schedule = gen_schedule;
        self.dis_schedule = dis_schedule;

        tracing::info!(
            iteration,
            source = ?located.source,
            "resumed from checkpoint"
        );
        tracing::warn!("classifier optimizer state not restored; its slot was loaded into the discriminator optimizer");
        Ok(ResumeReport {
            iteration,
            source: located.source,
            classifier_optimizer_restored: false,
        })
    }

    /// Parameter ids with optimizer state, per optimizer.
    pub fn optimizer_state_ids(&self) -> OptimizerStateIds {
        fn ids<B: AutodiffBackend>(record: OptimRecord<B>) -> Vec<u64> {
            let mut ids: Vec<u64> = record.keys().map(|id| id.val()).collect();
            ids.sort_unstable();
            ids
        }
        OptimizerStateIds {
            gen: ids::<B>(self.gen_opt.to_record()),
            dis: ids::<B>(self.dis_opt.to_record()),
            cls: ids::<B>(self.cls_opt.to_record()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_zero_padded() {
        assert_eq!(bundle_name("gen", 1000), "gen_00001000.bin");
        assert_eq!(manifest_name(7), "manifest_00000007.json");
    }

    #[test]
    fn iteration_comes_from_the_last_eight_digits() {
        assert_eq!(parse_iteration(Path::new("run/gen_00001000.bin")).unwrap(), 1000);
        assert_eq!(parse_iteration(Path::new("cls_12345678.bin")).unwrap(), 12_345_678);
        assert!(matches!(
            parse_iteration(Path::new("gen_latest.bin")),
            Err(TrainError::CheckpointName(_))
        ));
        assert!(parse_iteration(Path::new("gen.bin")).is_err());
    }

    #[test]
    fn latest_is_lexicographic() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["gen_00000010.bin", "gen_00000200.bin", "gen_00000030.bin", "dis_00009999.bin"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        let latest = find_latest(dir.path(), "gen", "bin").unwrap();
        assert_eq!(latest.file_name().unwrap(), "gen_00000200.bin");
        assert!(matches!(
            find_latest(dir.path(), "cls", "bin"),
            Err(TrainError::CheckpointNotFound { prefix: "cls", .. })
        ));
        assert!(matches!(
            find_latest(&dir.path().join("missing"), "gen", "bin"),
            Err(TrainError::CheckpointNotFound { .. })
        ));
    }

    fn manifest(iteration: u64) -> CheckpointManifest {
        let hash = "ab".repeat(32);
        let e = |file: String| ManifestEntry {
            file,
            sha256: hash.clone(),
        };
        CheckpointManifest {
            schema_version: CheckpointSchemaVersion::V1,
            iteration,
            saved_at_unix: 1.0,
            files: ManifestFiles {
                gen: e(bundle_name("gen", iteration)),
                dis: e(bundle_name("dis", iteration)),
                cls: e(bundle_name("cls", iteration)),
                optimizer: e("optimizer.bin".into()),
            },
        }
    }

    #[test]
    fn manifest_validation() {
        assert!(manifest(5).validate().is_ok());
        assert!(manifest(0).validate().is_err());
        let mut bad = manifest(5);
        bad.files.dis.file = bundle_name("dis", 4);
        assert!(bad.validate().is_err());
        let mut bad = manifest(5);
        bad.files.optimizer.sha256 = "zz".into();
        assert!(bad.validate().is_err());
    }
}
