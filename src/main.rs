#![windows_subsystem = "windows"]

use artboard::app::ArtboardApp;
use artboard::logger;
use clap::Parser;
use eframe::egui;

/// Multi-layer raster canvas editor.
#[derive(Parser, Debug)]
#[command(name = "artboard", about = "Multi-layer raster canvas editor")]
struct Args {
    /// Canvas width in pixels.
    #[arg(long, default_value_t = 800, value_name = "PX")]
    width: u32,

    /// Canvas height in pixels.
    #[arg(long, default_value_t = 600, value_name = "PX")]
    height: u32,

    /// Number of undo states kept in memory.
    #[arg(long, default_value_t = 50, value_name = "N")]
    history_capacity: usize,
}

fn main() -> Result<(), eframe::Error> {
    // Initialize session log (overwrites previous session log)
    logger::init();

    let args = Args::parse();

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1280.0, 720.0])
            .with_title("Artboard"),
        ..Default::default()
    };

    eframe::run_native(
        "Artboard",
        options,
        Box::new(move |cc| {
            Box::new(ArtboardApp::new(
                cc,
                args.width.max(1),
                args.height.max(1),
                args.history_capacity,
            ))
        }),
    )
}
