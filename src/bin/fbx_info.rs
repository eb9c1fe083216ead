use clap::Parser;
use fbxscene::fbx::{self, ImportOptions};
use fbxscene::util::{FileFormat, detect_format};

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::process::ExitCode;

/// Prints what an FBX file contains.
#[derive(Parser, Debug)]
#[command(name = "fbx_info")]
struct Args {
    /// FBX file, binary or text.
    input: PathBuf,

    /// Write embedded textures next to the input.
    #[arg(long)]
    write_textures: bool,

    /// Skip malformed objects instead of failing.
    #[arg(long)]
    lenient: bool,

    /// Also dump the raw node tree as a graphviz graph.
    #[arg(long)]
    dot: Option<PathBuf>,
}

fn run(args: &Args) -> fbxscene::Result<()> {
    let bytes = std::fs::read(&args.input)?;
    let format = detect_format(&bytes);
    println!("[INFO]: Info about {} ({format:?}):", args.input.display());

    if let Some(dot) = &args.dot {
        let doc = match format {
            FileFormat::FBXBinary => fbx::parser::parse(&bytes)?,
            _ => fbx::text::parse(&String::from_utf8_lossy(&bytes))?,
        };
        doc.to_graphviz(BufWriter::new(File::create(dot)?))?;
        println!("[INFO]: Saved {}", dot.display());
    }

    let root = args.input.parent().unwrap_or(std::path::Path::new("."));
    let opts = ImportOptions::default()
        .with_root_path(root)
        .with_write_textures(args.write_textures)
        .with_strict(!args.lenient);
    let scene = fbx::import(&bytes, &opts)?;

    println!("# Nodes {}", scene.nodes.len());
    println!("\t{} with meshes", scene.mesh_nodes().count());
    println!("# Meshes {}", scene.meshes.len());
    for m in &scene.meshes {
        println!(
            "\t#V = {}, #T = {}, #Submeshes = {}, skinned = {}, name = {}",
            m.v.len(),
            m.num_tris(),
            m.submeshes.len(),
            m.is_skinned(),
            m.name
        );
    }
    println!("# Skeletons {}", scene.skeletons.len());
    for s in &scene.skeletons {
        println!("\t#Bones = {}, name = {}", s.bones.len(), s.name);
    }
    println!("# Materials {}", scene.materials.len());
    println!("# Textures {}", scene.textures.len());
    println!("# Animations {}", scene.animations.len());
    for a in &scene.animations {
        println!(
            "\t#Channels = {}, duration = {:.3}s, name = {}",
            a.channels.len(),
            a.duration(),
            a.name
        );
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            eprintln!("[ERROR]: {e}");
            ExitCode::FAILURE
        }
    }
}
