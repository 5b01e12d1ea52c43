#![warn(clippy::all, rust_2018_idioms)]
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod map;
mod nest_api;
mod ui;

use nest_api::properties::NestClient;
use nest_api::tiles::{TileRetriever, DEFAULT_TILE_URL};

fn main() -> eframe::Result<()> {
    env_logger::init();
    dotenv::dotenv().ok();

    let api_url =
        dotenv::var("NEST_API_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());
    let tile_url = dotenv::var("NEST_TILE_URL").unwrap_or_else(|_| DEFAULT_TILE_URL.to_string());
    let current_user = dotenv::var("NEST_USER_ID").ok();

    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size(egui::vec2(1440.0, 900.0))
            .with_min_inner_size(egui::vec2(640.0, 480.0))
            .with_title("Nest")
            .with_resizable(true),
        ..Default::default()
    };

    eframe::run_native(
        "Nest",
        native_options,
        Box::new(move |cc| {
            let http = reqwest::Client::new();
            let properties = NestClient::new(http.clone(), api_url);
            let tiles = TileRetriever::new(http, tile_url);
            Ok(Box::new(ui::app::NestApp::new(
                cc,
                properties,
                tiles,
                current_user,
            )))
        }),
    )
}
