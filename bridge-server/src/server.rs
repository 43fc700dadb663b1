//! HTTP server assembly

use actix_cors::Cors;
use actix_web::{dev::Server, middleware, web, App, HttpServer};
use anyhow::Context;
use bindings::{Orchestrator, ServerConfig};
use std::sync::Arc;

use crate::{handlers, QueryService};

/// Bind the query API. The returned server must be driven on a tokio
/// runtime; signals are left to the caller.
pub fn build(orchestrator: Arc<Orchestrator>, config: &ServerConfig) -> anyhow::Result<Server> {
    let query = web::Data::new(QueryService::new(orchestrator));

    let server = HttpServer::new(move || {
        App::new()
            .app_data(query.clone())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allow_any_method()
                    .allow_any_header()
                    .max_age(3600),
            )
            .wrap(middleware::Logger::default())
            .wrap(middleware::NormalizePath::trim())
            .configure(handlers::configure_routes)
    })
    .workers(config.workers)
    .disable_signals()
    .bind((config.host.as_str(), config.port))
    .with_context(|| format!("Failed to bind {}:{}", config.host, config.port))?
    .run();

    Ok(server)
}

#[cfg(test)]
mod tests {
    use super::*;
    use adapters::KubeMqConfig;
    use bindings::{AdapterConfig, BindingConfig, BindingType, DefaultAdapterFactory, RuntimeConfig};
    use std::net::TcpListener;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn free_port() -> u16 {
        TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_server_runs_on_tokio_runtime() {
        let kubemq = |queue: &str| AdapterConfig::KubeMq(KubeMqConfig::new("localhost:9090", queue));
        let binding = BindingConfig::new("kubemq_to_kubemq", BindingType::KubemqToKubemq, kubemq("in"), kubemq("out"));
        let orchestrator = Arc::new(
            Orchestrator::new(vec![binding], RuntimeConfig::default(), Arc::new(DefaultAdapterFactory)).unwrap(),
        );
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: free_port(),
            workers: 1,
        };

        let server = build(orchestrator, &config).unwrap();
        let handle = server.handle();
        let task = tokio::spawn(server);

        let mut response = String::new();
        for _ in 0..50 {
            if let Ok(mut stream) = TcpStream::connect(("127.0.0.1", config.port)).await {
                stream
                    .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
                    .await
                    .unwrap();
                stream.read_to_string(&mut response).await.unwrap();
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("mq-bridge"));

        handle.stop(true).await;
        assert!(task.await.unwrap().is_ok());
    }
}
