use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use gateway::{configure, AppState, GatewayConfig};
use tracing::info;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gateway=debug,settlement=debug,actix_web=info".into()),
        )
        .init();

    info!("Starting settlement gateway");

    let config = GatewayConfig::from_env();
    let bind_addr = config.bind_addr.clone();

    let state = AppState::build(config).await?;
    info!("Service graph wired; journal chain verified");

    state.scheduler.clone().spawn();
    info!("Lifecycle scheduler running");

    let app_state = web::Data::from(state);

    info!("Listening on {}", bind_addr);
    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(cors)
            .wrap(Logger::default())
            .app_data(app_state.clone())
            .configure(configure)
    })
    .bind(&bind_addr)?
    .run()
    .await?;

    Ok(())
}
