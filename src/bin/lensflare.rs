//! Command-line front-end: renders a project or animation to disk.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use lensflare::animation;
use lensflare::data::{Project, RenderElement};
use lensflare::engine::Engine;
use lensflare::storage::Storage;
use lensflare::worker::CancelToken;

const EXIT_BAD_INPUT: u8 = 1;
const EXIT_DEVICE: u8 = 2;
const EXIT_RENDER: u8 = 3;

#[derive(Parser)]
#[command(name = "lensflare", about = "Physically-based lens flares", version)]
struct Args {
    /// The project to render, a path to a .json file
    #[arg(long)]
    project: Option<PathBuf>,

    /// Animation document: project-shaped JSON where leaves may be lists
    #[arg(long)]
    animation: Option<PathBuf>,

    /// Output image path; $F, $F2..$F4 expand to frame numbers
    #[arg(long)]
    output: Option<String>,

    /// Element to render
    #[arg(long, default_value = "FLARE")]
    element: String,

    /// Output colorspace tag
    #[arg(long)]
    colorspace: Option<String>,

    /// Start frame number (inclusive)
    #[arg(long, default_value_t = 1)]
    frame_start: i32,

    /// End frame number (inclusive)
    #[arg(long, default_value_t = 1)]
    frame_end: i32,

    /// Logging level (10 debug, 20 info, 30 warning, 40 error)
    #[arg(long, default_value_t = 30)]
    log: i32,
}

fn log_level(level: i32) -> log::LevelFilter {
    match level {
        i32::MIN..=10 => log::LevelFilter::Debug,
        11..=20 => log::LevelFilter::Info,
        21..=30 => log::LevelFilter::Warn,
        _ => log::LevelFilter::Error,
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    env_logger::Builder::new()
        .filter_level(log_level(args.log))
        .init();

    let element: RenderElement = match args.element.parse() {
        Ok(element) => element,
        Err(e) => {
            log::error!("{e}");
            return ExitCode::from(EXIT_BAD_INPUT);
        }
    };

    let storage = Storage::new();

    // an animation document supersedes a plain project
    let animation_doc = match &args.animation {
        Some(path) => match storage.read_json(path) {
            Ok(doc) => Some(doc),
            Err(e) => {
                log::error!("{e}");
                return ExitCode::from(EXIT_BAD_INPUT);
            }
        },
        None => None,
    };

    let base_project = match (&animation_doc, &args.project) {
        (Some(doc), _) => match animation::project_for_frame(doc, 0) {
            Ok(project) => project,
            Err(e) => {
                log::error!("{e}");
                return ExitCode::from(EXIT_BAD_INPUT);
            }
        },
        (None, Some(path)) => match storage.load_project(path) {
            Ok(project) => project,
            Err(e) => {
                log::error!("{e}");
                return ExitCode::from(EXIT_BAD_INPUT);
            }
        },
        (None, None) => {
            log::error!("either --project or --animation is required");
            return ExitCode::from(EXIT_BAD_INPUT);
        }
    };

    let mut engine = match Engine::new(&base_project.render.device, std::sync::Arc::new(storage)) {
        Ok(engine) => engine,
        Err(e) => {
            log::error!("{e}");
            return ExitCode::from(EXIT_DEVICE);
        }
    };

    let cancel = CancelToken::none();
    for frame in args.frame_start..=args.frame_end {
        let mut project: Project = match &animation_doc {
            Some(doc) => {
                let index = (frame - args.frame_start).max(0) as usize;
                match animation::project_for_frame(doc, index) {
                    Ok(project) => project,
                    Err(e) => {
                        log::error!("{e}");
                        return ExitCode::from(EXIT_BAD_INPUT);
                    }
                }
            }
            None => base_project.clone(),
        };
        if let Some(output) = &args.output {
            project.output.path.clone_from(output);
        }
        if let Some(colorspace) = &args.colorspace {
            project.output.colorspace.clone_from(colorspace);
        }

        let result = engine.render(
            &project,
            &[element],
            &cancel,
            &mut |image| {
                log::info!("rendered {} ({} frame {frame})", image.element.name(), image.colorspace);
            },
            &mut |_| {},
        );
        match result {
            Ok(()) => engine.write_output(&project, element, frame),
            Err(e) if e.is_fatal() => {
                log::error!("{e}");
                return ExitCode::from(EXIT_DEVICE);
            }
            Err(e) => {
                log::error!("{e}");
                return ExitCode::from(EXIT_RENDER);
            }
        }
    }

    ExitCode::SUCCESS
}
