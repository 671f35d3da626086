use std::sync::Arc;
use tide::{Request, Response, StatusCode};

use crate::prometheus::{render, Exporter};
use crate::substrate::Connector;
use crate::utils::Config;

pub struct State<C: Connector> {
    pub config: Arc<Config>,
    pub exporter: Arc<Exporter<C>>,
}

impl<C: Connector> Clone for State<C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            exporter: self.exporter.clone(),
        }
    }
}

// build the exporter's http app; the metrics route comes from config
pub fn app<C: Connector>(state: State<C>) -> tide::Server<State<C>> {
    let metrics_path = state.config.metrics_path.clone();
    let mut app = tide::with_state(state);
    app.at(&metrics_path).get(handle_metrics::<C>);
    app.at("/").get(handle_index::<C>);
    app
}

// run one scrape and render it; failed scrapes still answer 200
pub async fn handle_metrics<C: Connector>(req: Request<State<C>>) -> tide::Result {
    let state = req.state();
    let samples = state.exporter.collect().await;
    let encoded = render(&state.config.metrics_prefix, samples)
        .map_err(|e| tide::Error::from_str(StatusCode::InternalServerError, e.to_string()))?;
    Ok(Response::builder(StatusCode::Ok)
        .body(encoded)
        .content_type("application/openmetrics-text; version=1.0.0; charset=utf-8")
        .build())
}

pub async fn handle_index<C: Connector>(req: Request<State<C>>) -> tide::Result {
    let metrics_path = &req.state().config.metrics_path;
    let body = format!(
        "<html>
<head><title>Chain State Exporter</title></head>
<body>
<h1>Chain State Exporter {}</h1>
<p><a href='{}'>Metrics</a></p>
</body>
</html>
",
        env!("CARGO_PKG_VERSION"),
        metrics_path
    );
    Ok(Response::builder(StatusCode::Ok)
        .body(body)
        .content_type(tide::http::mime::HTML)
        .build())
}
