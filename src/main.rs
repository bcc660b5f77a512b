use std::path::PathBuf;

use eframe::egui;

mod app;
mod engine;
mod geometry;
mod input;
mod render;
mod store;
mod workflow;

use app::AnnotateApp;

fn main() {
    env_logger::init();

    // Image from the command line, or a picker when launched bare.
    let image_path = match std::env::args().nth(1) {
        Some(arg) => PathBuf::from(arg),
        None => {
            let picked = rfd::FileDialog::new()
                .add_filter("images", &["png", "jpg", "jpeg"])
                .pick_file();
            match picked {
                Some(path) => path,
                None => {
                    eprintln!("Usage: part-annotate <image.png|jpg>");
                    std::process::exit(1);
                }
            }
        }
    };
    if !image_path.exists() {
        eprintln!("File not found: {}", image_path.display());
        std::process::exit(1);
    }

    let title = format!(
        "part-annotate — {}",
        image_path
            .file_name()
            .unwrap_or_default()
            .to_str()
            .unwrap_or("")
    );

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1200.0, 800.0])
            .with_title(&title),
        ..Default::default()
    };

    eframe::run_native(
        &title,
        options,
        Box::new(move |_cc| Ok(Box::new(AnnotateApp::new(image_path)))),
    )
    .expect("Failed to run eframe");
}
