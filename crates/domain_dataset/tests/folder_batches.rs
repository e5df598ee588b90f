//! End-to-end folder indexing and batch assembly.

use burn_ndarray::NdArray;
use domain_dataset::{
    BatchConfig, BatchIter, DatasetError, DomainDataset, ImageFolder, TransformPipeline,
};
use image::{Rgb, RgbImage};
use std::fs;
use std::path::Path;

type B = NdArray<f32>;

fn write_class(root: &Path, class: &str, count: usize, shade: u8) -> anyhow::Result<()> {
    let dir = root.join(class);
    fs::create_dir_all(&dir)?;
    for i in 0..count {
        let mut img = RgbImage::new(12, 10);
        for p in img.pixels_mut() {
            *p = Rgb([shade, shade / 2, 255 - shade]);
        }
        img.save(dir.join(format!("img_{i:03}.png")))?;
    }
    // Non-image files are ignored.
    fs::write(dir.join("notes.txt"), b"skip me")?;
    Ok(())
}

#[test]
fn classes_follow_sorted_directory_names() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    write_class(temp.path(), "zebra", 2, 10)?;
    write_class(temp.path(), "apple", 3, 200)?;

    let folder = ImageFolder::open(temp.path(), TransformPipeline::eval((8, 8), (8, 8), 3))?;
    assert_eq!(folder.classes(), &["apple".to_string(), "zebra".to_string()]);
    assert_eq!(folder.len(), 5);

    let mut rng = rand::rng();
    let first = folder.get(0, &mut rng)?;
    let last = folder.get(4, &mut rng)?;
    assert_eq!(first.label, 0);
    assert_eq!(last.label, 1);
    assert_eq!(first.shape(), [3, 8, 8]);
    assert!(matches!(
        folder.get(5, &mut rng),
        Err(DatasetError::OutOfRange { index: 5, len: 5 })
    ));
    Ok(())
}

#[test]
fn flat_folder_is_single_class() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    RgbImage::new(4, 4).save(temp.path().join("only.png"))?;
    let folder = ImageFolder::open(temp.path(), TransformPipeline::eval((4, 4), (4, 4), 1))?;
    assert_eq!(folder.len(), 1);
    assert_eq!(folder.get(0, &mut rand::rng())?.shape(), [1, 4, 4]);
    Ok(())
}

#[test]
fn empty_folder_is_an_error() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    assert!(matches!(
        ImageFolder::open(temp.path(), TransformPipeline::default()),
        Err(DatasetError::Empty { .. })
    ));
    Ok(())
}

#[test]
fn batches_cycle_through_epochs() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    write_class(temp.path(), "a", 3, 30)?;
    write_class(temp.path(), "b", 2, 90)?;
    let folder = ImageFolder::open(temp.path(), TransformPipeline::train((10, 10), (8, 8), 3))?;
    let cfg = BatchConfig {
        batch_size: 2,
        shuffle: true,
        seed: Some(7),
        drop_last: true,
    };
    let mut iter = BatchIter::new(folder, cfg)?;
    let device = Default::default();

    let mut seen = 0;
    while let Some(batch) = iter.next_batch::<B>(&device)? {
        assert_eq!(batch.images.dims(), [2, 3, 8, 8]);
        assert_eq!(batch.labels.dims(), [2]);
        seen += batch.len();
    }
    assert_eq!(seen, 4, "partial trailing batch is dropped");

    let batch = iter.next_batch_cycling::<B>(&device)?;
    assert_eq!(batch.len(), 2);
    assert_eq!(iter.epoch(), 1);

    let values = batch
        .images
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .unwrap_or_default();
    assert!(values.iter().all(|v| (-1.0..=1.0).contains(v)));
    Ok(())
}

#[test]
fn same_seed_same_order() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    write_class(temp.path(), "a", 4, 0)?;
    write_class(temp.path(), "b", 4, 255)?;
    let device = Default::default();
    let labels = |seed| -> anyhow::Result<Vec<i64>> {
        let folder = ImageFolder::open(temp.path(), TransformPipeline::eval((4, 4), (4, 4), 3))?;
        let cfg = BatchConfig {
            batch_size: 8,
            shuffle: true,
            seed: Some(seed),
            drop_last: false,
        };
        let mut iter = BatchIter::new(folder, cfg)?;
        let batch = iter
            .next_batch::<B>(&device)?
            .ok_or_else(|| anyhow::anyhow!("no batch"))?;
        Ok(batch.labels.into_data().convert::<i64>().to_vec::<i64>().unwrap_or_default())
    };
    assert_eq!(labels(11)?, labels(11)?);
    Ok(())
}
