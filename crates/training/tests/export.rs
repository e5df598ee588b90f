mod common;

use common::{config, labeled, B};
use domain_dataset::InMemoryDataset;
use rand::rngs::StdRng;
use rand::SeedableRng;
use training::Trainer;

#[test]
fn export_writes_one_file_per_example() {
    let out = tempfile::tempdir().unwrap();
    let mut rng = StdRng::seed_from_u64(0);
    let mut trainer = Trainer::<B>::new(config(), &Default::default(), &mut rng).unwrap();
    let before = trainer.parameter_digests().unwrap();

    let test_a = InMemoryDataset::new(vec![labeled(0, 0), labeled(1, 1), labeled(2, 0)]);
    let test_b = InMemoryDataset::new(vec![labeled(3, 1), labeled(4, 0)]);
    let dirs = trainer
        .export_translations(&test_a, &test_b, out.path(), 99, &mut rng)
        .expect("export");

    assert_eq!(dirs.ab, out.path().join("ab_00000100"));
    for dir in [&dirs.a_recon, &dirs.ab] {
        for name in ["00000.jpg", "00001.jpg", "00002.jpg"] {
            assert!(dir.join(name).is_file(), "{} missing", dir.join(name).display());
        }
    }
    for dir in [&dirs.b_recon, &dirs.ba] {
        assert!(dir.join("00001.jpg").is_file());
        assert!(!dir.join("00002.jpg").exists());
    }
    let img = image::open(dirs.ba.join("00000.jpg")).unwrap();
    assert_eq!((img.width(), img.height()), (8, 8));
    assert_eq!(before, trainer.parameter_digests().unwrap());
}

#[test]
fn export_styles_do_not_depend_on_the_caller_rng() {
    let mut rng = StdRng::seed_from_u64(0);
    let mut trainer = Trainer::<B>::new(config(), &Default::default(), &mut rng).unwrap();
    let test_a = InMemoryDataset::new(vec![labeled(0, 0)]);
    let test_b = InMemoryDataset::new(vec![labeled(1, 1)]);

    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    let dirs_1 = trainer
        .export_translations(&test_a, &test_b, first.path(), 0, &mut StdRng::seed_from_u64(1))
        .unwrap();
    let dirs_2 = trainer
        .export_translations(&test_a, &test_b, second.path(), 0, &mut StdRng::seed_from_u64(2))
        .unwrap();
    let bytes = |p: std::path::PathBuf| std::fs::read(p).unwrap();
    assert_eq!(bytes(dirs_1.ab.join("00000.jpg")), bytes(dirs_2.ab.join("00000.jpg")));
    assert_eq!(bytes(dirs_1.ba.join("00000.jpg")), bytes(dirs_2.ba.join("00000.jpg")));
}
