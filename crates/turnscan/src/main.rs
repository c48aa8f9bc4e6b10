//! Command line front end for turnscan.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use turnscan::{
    available_ports, init_logging, load_settings, read_ply_points, run_pipeline, LinkEvent,
    MeshWriter, ObjMeshWriter, PlyEncoding, PlyMeshWriter, PlyPointWriter, PointCloudWriter,
    ScannerSettings, SerialPortTransport, TurntableLink, DEFAULT_BAUD_RATE, DEFAULT_MESH_FILE,
    DEFAULT_POINTS_FILE,
};

/// Turntable 3D scanner tools
#[derive(Parser, Debug)]
#[command(name = "turnscan")]
#[command(version, about = "Turntable 3D scanning tools", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List available serial ports
    Ports,
    /// Rotate the turntable by one manual step
    Step {
        /// Serial port of the turntable controller
        #[arg(short, long)]
        port: String,

        /// Baud rate
        #[arg(long, default_value_t = DEFAULT_BAUD_RATE)]
        baud: u32,

        /// Seconds to wait for the step to finish
        #[arg(long, default_value = "30")]
        timeout: u64,
    },
    /// Run the mesh pipeline over a PLY point cloud
    Reconstruct {
        /// Input point cloud (PLY)
        #[arg(short, long)]
        input: PathBuf,

        /// Settings file (JSON); defaults are used if omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output point cloud
        #[arg(long, default_value = DEFAULT_POINTS_FILE)]
        points_out: PathBuf,

        /// Output mesh; `.ply` writes PLY, anything else OBJ
        #[arg(long, default_value = DEFAULT_MESH_FILE)]
        mesh_out: PathBuf,

        /// Write PLY bodies as text
        #[arg(long)]
        ascii: bool,
    },
    /// Write the default settings file
    Config {
        /// Output path
        #[arg(short, long, default_value = "turnscan.json")]
        output: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let args = Args::parse();

    match args.command {
        Command::Ports => list_ports(),
        Command::Step {
            port,
            baud,
            timeout,
        } => step(&port, baud, Duration::from_secs(timeout)),
        Command::Reconstruct {
            input,
            config,
            points_out,
            mesh_out,
            ascii,
        } => reconstruct(&input, config.as_deref(), &points_out, &mesh_out, ascii),
        Command::Config { output } => {
            ScannerSettings::default()
                .save(&output)
                .with_context(|| format!("failed to write {}", output.display()))?;
            println!("wrote default settings to {}", output.display());
            Ok(())
        }
    }
}

fn list_ports() -> anyhow::Result<()> {
    let ports = available_ports()?;
    if ports.is_empty() {
        println!("no serial ports found");
    }
    for port in ports {
        println!("{port}");
    }
    Ok(())
}

fn step(port: &str, baud: u32, timeout: Duration) -> anyhow::Result<()> {
    let mut link = TurntableLink::new();
    link.connect(Box::new(SerialPortTransport::new(port, baud)))
        .with_context(|| format!("failed to open {port}"))?;
    link.manual_step()?;

    let event = link.poll_timeout(timeout)?;
    link.disconnect();
    match event {
        Some(LinkEvent::StepDone) => {
            println!("step done");
            Ok(())
        }
        Some(other) => bail!("unexpected turntable response: {other:?}"),
        None => bail!("no response from the turntable within {}s", timeout.as_secs()),
    }
}

fn reconstruct(
    input: &Path,
    config: Option<&Path>,
    points_out: &Path,
    mesh_out: &Path,
    ascii: bool,
) -> anyhow::Result<()> {
    let settings = load_settings(config).context("failed to load settings")?;
    let points = read_ply_points(input)
        .with_context(|| format!("failed to read {}", input.display()))?;
    println!("read {} points from {}", points.len(), input.display());

    let output = run_pipeline(points.to_cloud(), settings.mesh, |stage| {
        println!("{stage}");
    })?;
    if let Some(err) = &output.reconstruction_error {
        eprintln!("reconstruction failed: {err}");
    }

    let encoding = if ascii {
        PlyEncoding::Ascii
    } else {
        PlyEncoding::Binary
    };
    if output.config.export.points {
        PlyPointWriter::new(points_out)
            .with_encoding(encoding)
            .write_points(&output.points)?;
        println!("wrote {} points to {}", output.points.len(), points_out.display());
    }
    if let (true, Some(mesh)) = (output.config.export.mesh, &output.mesh) {
        let is_ply = mesh_out
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("ply"));
        if is_ply {
            PlyMeshWriter::new(mesh_out)
                .with_encoding(encoding)
                .write_mesh(mesh)?;
        } else {
            ObjMeshWriter::new(mesh_out).write_mesh(mesh)?;
        }
        println!("wrote {} faces to {}", mesh.num_faces(), mesh_out.display());
    }
    Ok(())
}
