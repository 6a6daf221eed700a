use clap::Parser;
use log::{error, info};
use std::process::ExitCode;

use topaz_bridge::box_file::write_box_files;
use topaz_bridge::config::{
    Args, Command, ExportBoxesArgs, ImportArgs, PickArgs, ReadPredictionsArgs, SplitArgs, TrainArgs,
};
use topaz_bridge::io::{read_coordinate_set, write_coordinate_set};
use topaz_bridge::pipeline::{import_model, prepare_split, run_picking, run_training, write_split};
use topaz_bridge::stream::{JsonCoordinateSource, ThreadSleeper};
use topaz_bridge::types::{build_micrograph_index, CoordinateSet};
use topaz_bridge::utils::ensure_directory;
use topaz_bridge::{box_size, read_predictions, Result, TopazError, TopazRunner};

fn main() -> ExitCode {
    // Initialize the logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let result = match args.command {
        Command::Split(args) => split(&args),
        Command::Train(args) => train(&args),
        Command::Pick(args) => pick(&args),
        Command::ImportModel(args) => import(&args),
        Command::ReadPredictions(args) => convert_predictions(&args),
        Command::ExportBoxes(args) => export_boxes(&args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn split(args: &SplitArgs) -> Result<()> {
    let source = JsonCoordinateSource::new(&args.coordinates);
    let split = prepare_split(
        &source,
        args.mics,
        args.test_percent,
        args.seed,
        &args.stream.to_poll_policy(),
        &ThreadSleeper,
    )?;
    write_split(&split, &args.output_dir, args.scale)?;
    info!("Manifests written to {}", args.output_dir.display());
    Ok(())
}

fn train(args: &TrainArgs) -> Result<()> {
    let config = args.to_training_config()?;
    let source = JsonCoordinateSource::new(&args.coordinates);
    let runner = TopazRunner::from_config(&config.preprocess);
    ensure_directory(&args.work_dir)?;

    info!("Starting topaz training in {}", args.work_dir.display());
    let model = run_training(&config, &args.work_dir, &source, &runner, &ThreadSleeper)?;
    info!("Model ready: {}", model.path().display());
    Ok(())
}

fn pick(args: &PickArgs) -> Result<()> {
    let config = args.to_picking_config()?;
    let input = read_coordinate_set(&args.micrographs)?;
    if input.micrographs.is_empty() {
        return Err(TopazError::InsufficientData(format!(
            "no micrographs in {}",
            args.micrographs.display()
        )));
    }
    ensure_directory(&args.work_dir)?;
    let runner = TopazRunner::from_config(&config.preprocess);

    info!("Starting topaz picking in {}", args.work_dir.display());
    let picked = run_picking(&config, &args.work_dir, &input.micrographs, &runner)?;
    write_coordinate_set(&args.output, &picked)
}

fn import(args: &ImportArgs) -> Result<()> {
    let model = import_model(&args.model_path, &args.output_dir)?;
    info!("Imported {}", model);
    Ok(())
}

fn convert_predictions(args: &ReadPredictionsArgs) -> Result<()> {
    let input = read_coordinate_set(&args.micrographs)?;
    let index = build_micrograph_index(&input.micrographs);
    let (coordinates, stats) = read_predictions(&args.predictions, &index, args.scale)?;
    stats.print_summary();

    let output = CoordinateSet {
        micrographs: input.micrographs,
        coordinates,
        box_size: Some(box_size(args.radius, args.scale, args.box_size)?),
        stream_closed: true,
    };
    write_coordinate_set(&args.output, &output)
}

fn export_boxes(args: &ExportBoxesArgs) -> Result<()> {
    let set = read_coordinate_set(&args.coordinates)?;
    let size = args.box_size.or(set.box_size).ok_or_else(|| {
        TopazError::InvalidConfig("no box size given and none stored in the coordinate set".to_string())
    })?;
    ensure_directory(&args.output_dir)?;
    write_box_files(&args.output_dir, &set, size, args.flip_on_y)?;
    Ok(())
}
