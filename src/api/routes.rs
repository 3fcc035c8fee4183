// src/api/routes.rs
use actix_web::web;
use crate::api::handlers;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(handlers::health_check))
        .service(
            web::scope("/api/v1")
                .route("/softphone", web::get().to(handlers::get_softphone))
                .route("/softphone/initialize", web::post().to(handlers::initialize_softphone))
                .route("/agent/status", web::post().to(handlers::change_status))
                .route(
                    "/agent/connection-failure/dismiss",
                    web::post().to(handlers::dismiss_connection_failure),
                )
                .route("/calls", web::post().to(handlers::make_call))
                .route("/calls/answer", web::post().to(handlers::answer_call))
                .route("/calls/reject", web::post().to(handlers::reject_call))
                .route("/calls/end", web::post().to(handlers::end_call))
                .route("/calls/mute", web::post().to(handlers::toggle_mute))
                .route("/calls/hold", web::post().to(handlers::toggle_hold))
                .route("/calls/dtmf", web::post().to(handlers::send_dtmf))
                .route("/calls/dismiss", web::post().to(handlers::dismiss_ended))
                .route("/calls/history", web::get().to(handlers::call_history))
                .route("/queues", web::get().to(handlers::list_queues))
                .route("/queues/{id}/agents", web::get().to(handlers::queue_agents))
                .route("/callbacks", web::get().to(handlers::list_callbacks))
                .route("/callbacks", web::post().to(handlers::create_callback))
                .route("/callbacks/{id}/complete", web::post().to(handlers::complete_callback)),
        );
}
