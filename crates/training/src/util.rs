use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use burn::tensor::backend::Backend;
use clap::{Parser, ValueEnum};
use domain_dataset::{
    save_grid, BatchConfig, BatchIter, DomainBatch, DomainDataset, ImageFolder, TransformPipeline,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing_subscriber::EnvFilter;

use crate::config::TrainerConfig;
use crate::trainer::{ClassifierLosses, DiscriminatorLosses, GeneratorLosses, Trainer};
use crate::ADBackend;

const CHECKPOINT_SUBDIR: &str = "checkpoints";
const IMAGE_SUBDIR: &str = "images";

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum BackendKind {
    NdArray,
    Wgpu,
}

#[derive(Parser, Debug)]
#[command(name = "train", about = "Train a two-domain style translation model")]
pub struct TrainArgs {
    /// Trainer config (TOML).
    #[arg(long)]
    pub config: PathBuf,
    /// Run directory; receives `checkpoints/` and `images/`.
    #[arg(long, default_value = "outputs/run")]
    pub output: PathBuf,
    /// Continue from the newest checkpoint under `<output>/checkpoints`.
    #[arg(long, default_value_t = false)]
    pub resume: bool,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
    /// Directory with trainA/trainB/testA/testB; overrides `[train].data_root`.
    #[arg(long)]
    pub data_root: Option<PathBuf>,
    /// Overrides `[train].max_iter`.
    #[arg(long)]
    pub max_iter: Option<u64>,
    /// Overrides `[train].seed`.
    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Parser, Debug)]
#[command(name = "export", about = "Export per-image translations from a checkpoint")]
pub struct ExportArgs {
    /// Trainer config (TOML) the checkpoint was trained with.
    #[arg(long)]
    pub config: PathBuf,
    /// Checkpoint directory to resume from.
    #[arg(long)]
    pub checkpoint: PathBuf,
    /// Directory receiving the a_recon/ab/b_recon/ba folders.
    #[arg(long, default_value = "outputs/export")]
    pub output: PathBuf,
    /// Directory with testA/testB; overrides `[train].data_root`.
    #[arg(long)]
    pub data_root: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
}

/// Install the fmt subscriber, honouring `RUST_LOG` and defaulting to `info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .ok();
}

pub fn validate_backend_choice(kind: BackendKind) -> anyhow::Result<()> {
    let built_wgpu = cfg!(feature = "backend-wgpu");
    match (kind, built_wgpu) {
        (BackendKind::Wgpu, false) => {
            anyhow::bail!("backend-wgpu feature not enabled; rebuild with --features backend-wgpu or choose ndarray backend")
        }
        (BackendKind::NdArray, true) => {
            tracing::warn!("built with backend-wgpu; training will still use the WGPU backend despite --backend ndarray");
        }
        _ => {}
    }
    Ok(())
}

struct Folders {
    train_a: ImageFolder,
    train_b: ImageFolder,
    test_a: ImageFolder,
    test_b: ImageFolder,
}

fn data_root(config: &TrainerConfig, flag: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    flag.or_else(|| config.train.data_root.clone())
        .context("no data root: pass --data-root or set [train].data_root")
}

fn open_folders(config: &TrainerConfig, root: &Path) -> anyhow::Result<Folders> {
    let t = &config.train;
    let resize = (t.new_size, t.new_size);
    let crop = (t.crop_image_width, t.crop_image_height);
    let open = |name: &str, pipeline: TransformPipeline| {
        let dir = root.join(name);
        ImageFolder::open(&dir, pipeline)
            .with_context(|| format!("failed to open image folder {}", dir.display()))
    };
    Ok(Folders {
        train_a: open("trainA", TransformPipeline::train(resize, crop, config.input_dim_a))?,
        train_b: open("trainB", TransformPipeline::train(resize, crop, config.input_dim_b))?,
        test_a: open("testA", TransformPipeline::eval(resize, crop, config.input_dim_a))?,
        test_b: open("testB", TransformPipeline::eval(resize, crop, config.input_dim_b))?,
    })
}

/// First `n` images of a folder in directory order, with the deterministic
/// pipeline.
fn display_batch<B: Backend>(
    folder: &ImageFolder,
    resize: (u32, u32),
    crop: (u32, u32),
    channels: usize,
    n: usize,
    device: &B::Device,
) -> anyhow::Result<DomainBatch<B>> {
    let folder = ImageFolder::open(folder.root(), TransformPipeline::eval(resize, crop, channels))?;
    let cfg = BatchConfig {
        batch_size: n,
        shuffle: false,
        seed: Some(0),
        drop_last: false,
    };
    BatchIter::new(folder, cfg)?
        .next_batch(device)?
        .with_context(|| "display folder is empty".to_string())
}

/// Trim a display pair to a common batch size.
fn paired<B: Backend>(a: DomainBatch<B>, b: DomainBatch<B>) -> (DomainBatch<B>, DomainBatch<B>) {
    let n = a.len().min(b.len());
    let trim = |batch: DomainBatch<B>| DomainBatch {
        images: batch.images.narrow(0, 0, n),
        labels: batch.labels.narrow(0, 0, n),
    };
    (trim(a), trim(b))
}

fn log_iteration(
    iteration: u64,
    trainer: &Trainer<ADBackend>,
    dis: &DiscriminatorLosses,
    gen: &GeneratorLosses,
    cls: Option<&ClassifierLosses>,
) {
    let terms = gen
        .terms()
        .iter()
        .map(|(name, value)| format!("{name}={value:.4}"))
        .collect::<Vec<_>>()
        .join(" ");
    let acc = |r: crate::error::TrainResult<f64>| r.map(|v| format!("{v:.3}")).unwrap_or_else(|_| "n/a".into());
    tracing::info!(
        "iter {iteration:08}: gen_total={:.4} dis_total={:.4} {} dis_a={:.4} dis_b={:.4} cls_total={} gen_a_acc={} gen_b_acc={} cls_a_acc={} cls_b_acc={}",
        gen.total,
        dis.total,
        terms,
        dis.dis_a,
        dis.dis_b,
        cls.map(|c| format!("{:.4}", c.total)).unwrap_or_else(|| "-".into()),
        acc(trainer.gen_a_acc()),
        acc(trainer.gen_b_acc()),
        acc(trainer.cls_a_acc()),
        acc(trainer.cls_b_acc()),
    );
}

fn write_samples(
    trainer: &mut Trainer<ADBackend>,
    display: &(DomainBatch<ADBackend>, DomainBatch<ADBackend>),
    rng: &mut StdRng,
    image_dir: &Path,
    tag: &str,
    keyed: u64,
) -> anyhow::Result<()> {
    let outputs = trainer.sample(display.0.images.clone(), display.1.images.clone(), rng)?;
    let (a2b, b2a) = outputs.into_grids();
    save_grid(a2b, image_dir.join(format!("gen_a2b_{tag}_{keyed:08}.jpg")))?;
    save_grid(b2a, image_dir.join(format!("gen_b2a_{tag}_{keyed:08}.jpg")))?;
    Ok(())
}

pub fn run_train(args: TrainArgs) -> anyhow::Result<()> {
    validate_backend_choice(args.backend)?;
    let mut config = TrainerConfig::load(&args.config)?;
    if let Some(max_iter) = args.max_iter {
        config.train.max_iter = max_iter;
    }
    if let Some(seed) = args.seed {
        config.train.seed = seed;
    }
    let root = data_root(&config, args.data_root.clone())?;
    let folders = open_folders(&config, &root)?;
    let train = config.train.clone();

    let checkpoint_dir = args.output.join(CHECKPOINT_SUBDIR);
    let image_dir = args.output.join(IMAGE_SUBDIR);
    fs::create_dir_all(&checkpoint_dir)?;
    fs::create_dir_all(&image_dir)?;
    fs::copy(&args.config, args.output.join("config.toml"))
        .with_context(|| format!("failed to copy {}", args.config.display()))?;

    let device = <ADBackend as Backend>::Device::default();
    let mut rng = StdRng::seed_from_u64(train.seed);
    let resize = (train.new_size, train.new_size);
    let crop = (train.crop_image_width, train.crop_image_height);
    let n_display = config.display_size;
    let display_train = paired(
        display_batch(&folders.train_a, resize, crop, config.input_dim_a, n_display, &device)?,
        display_batch(&folders.train_b, resize, crop, config.input_dim_b, n_display, &device)?,
    );
    let display_test = paired(
        display_batch(&folders.test_a, resize, crop, config.input_dim_a, n_display, &device)?,
        display_batch(&folders.test_b, resize, crop, config.input_dim_b, n_display, &device)?,
    );

    let batch_cfg = |offset: u64| BatchConfig {
        batch_size: train.batch_size,
        shuffle: true,
        seed: Some(train.seed.wrapping_add(offset)),
        drop_last: true,
    };
    let mut iter_a = BatchIter::new(folders.train_a, batch_cfg(1))?;
    let mut iter_b = BatchIter::new(folders.train_b, batch_cfg(2))?;

    let mut trainer = Trainer::<ADBackend>::new(config, &device, &mut rng)?;
    let start = if args.resume {
        let report = trainer.resume(&checkpoint_dir)?;
        report.iteration
    } else {
        0
    };
    tracing::info!(
        start,
        max_iter = train.max_iter,
        train_a = iter_a.dataset().len(),
        train_b = iter_b.dataset().len(),
        output = %args.output.display(),
        "starting training"
    );

    for iteration in start..train.max_iter {
        let batch_a = iter_a.next_batch_cycling::<ADBackend>(&device)?;
        let batch_b = iter_b.next_batch_cycling::<ADBackend>(&device)?;
        let keyed = iteration + 1;

        trainer.update_learning_rate();
        let dis = trainer.discriminator_step(&batch_a, &batch_b, &mut rng)?;
        let gen = trainer.generator_step(&batch_a, &batch_b, &mut rng)?;
        let cls = if keyed % train.cls_iter == 0 {
            Some(trainer.classifier_step(&batch_a, &batch_b)?)
        } else {
            None
        };

        if keyed % train.log_iter == 0 {
            log_iteration(keyed, &trainer, &dis, &gen, cls.as_ref());
        }
        if keyed % train.image_save_iter == 0 {
            write_samples(&mut trainer, &display_test, &mut rng, &image_dir, "test", keyed)?;
            write_samples(&mut trainer, &display_train, &mut rng, &image_dir, "train", keyed)?;
        }
        if keyed % train.snapshot_save_iter == 0 {
            trainer.save(&checkpoint_dir, iteration)?;
        }
    }
    tracing::info!(iterations = train.max_iter, "training finished");
    Ok(())
}

pub fn run_export(args: ExportArgs) -> anyhow::Result<()> {
    validate_backend_choice(args.backend)?;
    let config = TrainerConfig::load(&args.config)?;
    let root = data_root(&config, args.data_root.clone())?;
    let folders = open_folders(&config, &root)?;

    let device = <ADBackend as Backend>::Device::default();
    let mut rng = StdRng::seed_from_u64(config.train.seed);
    let mut trainer = Trainer::<ADBackend>::new(config, &device, &mut rng)?;
    let report = trainer
        .resume(&args.checkpoint)
        .with_context(|| format!("failed to resume from {}", args.checkpoint.display()))?;
    // The export key is one past the iteration it receives; reuse the checkpoint's key.
    let dirs = trainer.export_translations(
        &folders.test_a,
        &folders.test_b,
        &args.output,
        report.iteration.saturating_sub(1),
        &mut rng,
    )?;
    tracing::info!(ab = %dirs.ab.display(), ba = %dirs.ba.display(), "export complete");
    Ok(())
}
