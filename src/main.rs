mod api;
mod app_state;
mod config;
mod engine;
mod error;
mod gemini;
mod page;
mod types;
mod upload;

use rocket::fairing::AdHoc;
use rocket::figment::Figment;
use rocket::{catchers, launch, routes, Build, Rocket};

use app_state::AppState;
use config::RelayConfig;

/// 路由和 catcher；AppState 由调用方负责 manage
pub(crate) fn build(figment: Figment) -> Rocket<Build> {
    rocket::custom(figment)
        .mount(
            "/",
            routes![
                api::index,
                api::health,
                api::upload,
                api::chat,
                api::stream,
                api::generate,
            ],
        )
        .register("/", catchers![api::default_catcher])
}

#[launch]
fn rocket() -> _ {
    build(config::figment()).attach(AdHoc::try_on_ignite("Chat Session", |rocket| async move {
        let config = match rocket.figment().extract::<RelayConfig>() {
            Ok(config) => config,
            Err(e) => {
                log::error!("invalid relay config: {e}");
                return Err(rocket);
            }
        };

        match engine::connect(&config) {
            Ok(session) => Ok(rocket.manage(AppState::new(config, session))),
            Err(e) => {
                log::error!("failed to create chat session: {e:#}");
                Err(rocket)
            }
        }
    }))
}
