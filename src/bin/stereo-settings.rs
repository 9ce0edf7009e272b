use docopt::Docopt;
use serde::Deserialize;

use std::process;

use stereo_replay::settings::{Settings, SettingsFile};

const USAGE: &str = "
Print or change a stereo-replay settings file.

Usage:
  stereo-settings <file>
  stereo-settings <file> set <key> <value>
  stereo-settings <file> reset
  stereo-settings (-h | --help)

With only a file name, print every setting, including defaults for keys the
file does not have. `set` changes one key, clamping it to its allowed range.
`reset` writes every default.

Options:
  -h --help     Show this screen.
";

#[derive(Debug, Deserialize)]
struct Args {
    arg_file: String,
    arg_key: Option<String>,
    arg_value: Option<String>,
    cmd_set: bool,
    cmd_reset: bool,
}

fn main() {
    env_logger::init();
    let args: Args = Docopt::new(USAGE)
        .and_then(|d| d.deserialize())
        .unwrap_or_else(|e| e.exit());

    if let Err(err) = run(&args) {
        eprintln!("stereo-settings: {}", err);
        process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), stereo_replay::SettingsError> {
    let mut settings = if args.cmd_reset {
        Settings::default()
    } else {
        Settings::load(&args.arg_file)?
    };

    if args.cmd_set {
        if let (Some(key), Some(value)) = (&args.arg_key, &args.arg_value) {
            settings.set_by_key(key, value)?;
            settings.clamp();
        }
    }
    if args.cmd_set || args.cmd_reset {
        settings.save(&args.arg_file)?;
    }

    print(&settings.to_file());
    Ok(())
}

fn print(file: &SettingsFile) {
    for (key, value) in file.iter() {
        println!("{:28} {:?}", key, value);
    }
}
