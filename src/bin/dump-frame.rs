use docopt::Docopt;
use serde::Deserialize;

use std::process;

use stereo_replay::capture;

const USAGE: &str = "
List the calls in a saved stereo-replay frame.

Usage:
  dump-frame [--state] <dir>...
  dump-frame (-h | --help)

Options:
  --state       Also print the pipeline state the frame started from.
  -h --help     Show this screen.
";

#[derive(Debug, Deserialize)]
struct Args {
    arg_dir: Vec<String>,
    flag_state: bool,
}

fn main() {
    env_logger::init();
    let args: Args = Docopt::new(USAGE)
        .and_then(|d| d.deserialize())
        .unwrap_or_else(|e| e.exit());

    let mut failed = false;
    for dir in &args.arg_dir {
        let frame = match capture::load(dir) {
            Ok(frame) => frame,
            Err(err) => {
                eprintln!("{}: {}", dir, err);
                failed = true;
                continue;
            }
        };

        println!("{}: {} calls, {} stashed bytes", dir, frame.get_n_api_commands(), frame.stash_contents().len());
        if args.flag_state {
            println!("{:#?}", frame.get_start_state());
        }
        for (i, call) in frame.calls().iter().enumerate() {
            println!("{:6} {:?}", i, call);
        }
    }

    if failed {
        process::exit(1);
    }
}
