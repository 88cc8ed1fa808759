use std::{sync::Arc, time::Duration};

use clap::Parser;
use navigator::{
    config::ServiceSettings,
    create_router,
    providers::{
        openweather::{DisabledWeather, OpenWeatherClient},
        osrm::OsrmClient,
        playback::PlaybackLocationProvider,
        spots::CuratedSpotProvider,
        LocationProvider, Providers, WeatherProvider,
    },
    ride_log::TracingRideLogSink,
    runtime, AppState,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "navigator=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = ServiceSettings::parse();
    let policy = settings.load_policy().expect("load navigation policy");
    let timeout = Duration::from_secs(settings.provider_timeout_s);

    let osrm = Arc::new(OsrmClient::new(&settings.osrm_url, timeout).expect("create OSRM client"));
    tracing::info!("directions from {}", settings.osrm_url);

    let weather: Arc<dyn WeatherProvider> = match &settings.openweather_api_key {
        Some(key) => Arc::new(
            OpenWeatherClient::new(&settings.openweather_url, key, timeout)
                .expect("create weather client"),
        ),
        None => {
            tracing::warn!("OPENWEATHER_API_KEY not set, weather and rain alerts disabled");
            Arc::new(DisabledWeather)
        }
    };

    let providers = Providers {
        directions: osrm.clone(),
        lookup: osrm,
        weather,
        spots: Arc::new(CuratedSpotProvider),
        ride_log: Arc::new(TracingRideLogSink),
    };

    let location: Option<Arc<dyn LocationProvider>> = if settings.playback {
        tracing::info!("replaying the Tokyo Bay ride instead of live locations");
        Some(Arc::new(PlaybackLocationProvider::tokyo_bay()))
    } else {
        None
    };

    let session = runtime::spawn(policy, providers, location);
    let app = create_router(AppState { session });

    let addr = settings.addr;
    tracing::info!("starting navigator on http://{addr}");
    tracing::info!("  GET  /api/navigation - current navigation snapshot");
    tracing::info!("  POST /api/navigation/destination - choose destination and plan");
    tracing::info!("  POST /api/navigation/confirm | cancel | retry | end");
    tracing::info!("  POST /api/navigation/location - push a location sample");
    tracing::info!("  POST /api/spots/search - search nearby spots");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("bind listener");
    axum::serve(listener, app).await.expect("serve navigator");
}
