use eframe::egui;

use iagram::api::server;
use iagram::gui::frontend::GraphApp;
use iagram::persistence::persist;
use iagram::persistence::settings::AppSettings;

fn main() -> eframe::Result {
    env_logger::init();

    let settings = AppSettings::load().unwrap_or_else(|e| {
        log::warn!("could not read settings, using defaults: {}", e);
        AppSettings::default()
    });
    persist::set_settings_override(settings.clone());
    let restored = persist::load_active().unwrap_or_else(|e| {
        log::warn!("could not restore last session: {}", e);
        None
    });

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build() {
            Ok(r) => r,
            Err(e) => {
                log::error!("failed to create tokio runtime for prompts: {}", e);
                std::process::exit(1);
            }
        };

    if settings.api_enabled {
        if let Err(e) = server::start_server(&settings) {
            log::error!("item store failed to start: {}", e);
        }
    }

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1300.0, 710.0])
            .with_min_inner_size([700.0, 420.0])
            .with_resizable(true),
        ..Default::default()
    };
    eframe::run_native(
        "iaGram",
        options,
        Box::new(move |_cc| Ok(Box::new(GraphApp::new(settings, runtime, restored)) as Box<dyn eframe::App>)),
    )
}
