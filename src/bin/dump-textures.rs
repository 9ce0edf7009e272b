use docopt::Docopt;
use serde::Deserialize;

use std::path::Path;
use std::{fs, io};

use stereo_replay::{capture, write_image, Call};

static USAGE: &str = "
Extract texture uploads from a saved stereo-replay frame.

For each `glTexImage2D` call that uploaded pixels, write an image named
`texture-T-N.png`, where T is the game's texture name bound at the time and
N is the call's index in the frame.

Usage:
  dump-textures [--out=<dir>] <dir>
  dump-textures (-h | --help)

Options:
  --out=<dir>   Where to write the images [default: .].
  -h --help     Show this screen.
";

#[derive(Debug, Deserialize)]
struct Args {
    arg_dir: String,
    flag_out: String,
}

fn main() -> io::Result<()> {
    env_logger::init();
    let args: Args = Docopt::new(USAGE)
        .and_then(|d| d.deserialize())
        .unwrap_or_else(|e| e.exit());

    let frame = capture::load(&args.arg_dir).map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))?;
    let out = Path::new(&args.flag_out);
    fs::create_dir_all(out)?;

    let mut bound = 0;
    let mut count = 0;
    for (i, call) in frame.calls().iter().enumerate() {
        match *call {
            Call::bind_texture { texture, .. } => bound = texture,
            Call::tex_image_2d { level, width, height, format, pixels: Some(blob), .. } => {
                let data = frame
                    .blob(blob)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))?;
                let path = out.join(format!("texture-{}-{}.png", bound, i));
                match write_image::write_image(&path, data, width as u32, height as u32, format) {
                    Ok(()) => {
                        log::debug!("texture {} level {} -> {}", bound, level, path.display());
                        count += 1;
                    }
                    Err(err) => eprintln!("call {}: {}", i, err),
                }
            }
            _ => (),
        }
    }
    println!("wrote {} texture images", count);

    Ok(())
}
