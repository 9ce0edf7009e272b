use docopt::Docopt;
use serde::Deserialize;

use std::process;

use stereo_replay::playback::{create_playback, BackendKind, Eye, BACKEND_ENV_VAR, DEFAULT_HORIZONTAL_FOV_DEGREES};
use stereo_replay::settings::{settings_panel_height, LauncherSettings};

const USAGE: &str = "
Report which VR backend stereo-replay would use, and what it can do.

The backend comes from the STEREO_REPLAY_BACKEND environment variable if it
is set to `openxr` or `simulated`, and from the launcher settings otherwise.
Eye sizes are only known once a backend has a GL context, so a headset
backend reports them as zero here.

Usage:
  backend-probe [--launcher=<file>] [--hfov=<degrees>]
  backend-probe (-h | --help)

Options:
  --launcher=<file>   Launcher settings file to read.
  --hfov=<degrees>    Horizontal field of view the game renders with.
  -h --help           Show this screen.
";

#[derive(Debug, Deserialize)]
struct Args {
    flag_launcher: Option<String>,
    flag_hfov: Option<f32>,
}

fn main() {
    env_logger::init();
    let args: Args = Docopt::new(USAGE)
        .and_then(|d| d.deserialize())
        .unwrap_or_else(|e| e.exit());

    let launcher = match &args.flag_launcher {
        Some(path) => LauncherSettings::load(path).unwrap_or_else(|err| {
            eprintln!("backend-probe: {}: {}", path, err);
            process::exit(1);
        }),
        None => LauncherSettings::default(),
    };

    let kind = BackendKind::select(&launcher);
    println!("launcher setting:   {}", launcher.active_backend.name());
    println!("{:19} {:?}", format!("{}:", BACKEND_ENV_VAR), std::env::var(BACKEND_ENV_VAR).ok());
    println!("selected backend:   {}", kind.name());

    let playback = match create_playback(kind, args.flag_hfov.unwrap_or(DEFAULT_HORIZONTAL_FOV_DEGREES)) {
        Ok(playback) => playback,
        Err(err) => {
            println!("unavailable:        {}", err);
            process::exit(2);
        }
    };
    println!("separate UI layer:  {}", playback.supports_separate_ui_texture());
    println!("manual viewport:    {}", playback.needs_manual_viewport_adjustment());
    println!("settings panel:     {} px", settings_panel_height(&*playback));
    for eye in Eye::BOTH.iter().copied() {
        let [width, height] = playback.eye_texture_resolution(eye);
        println!(
            "{:19} {}x{}, tan up {:.3}, tan down {:.3}, offset {:+.4} m",
            format!("{:?} eye:", eye),
            width,
            height,
            playback.tan_to_top_fov_edge(eye),
            playback.tan_to_bottom_fov_edge(eye),
            playback.eye_offset_x(eye)
        );
    }
}
