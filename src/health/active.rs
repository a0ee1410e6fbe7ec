//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe instances
//! - Update instance health state based on results

use axum::body::Body;
use axum::http::Request;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;

use crate::config::HealthCheckConfig;
use crate::load_balancer::Instance;
use crate::observability::metrics;
use crate::routing::Router;

pub struct HealthMonitor {
    router: Arc<Router>,
    config: HealthCheckConfig,
    client: Client<HttpConnector, Body>,
}

impl HealthMonitor {
    pub fn new(router: Arc<Router>, config: HealthCheckConfig) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        Self {
            router,
            config,
            client,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval = self.config.interval_secs,
            path = %self.config.path,
            "Health monitor starting"
        );

        let mut ticker = time::interval(Duration::from_secs(self.config.interval_secs.max(1)));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every instance of the current route table once.
    pub async fn check_all(&self) {
        let routes = self.router.routes();
        for route in routes.iter() {
            for instance in &route.instances {
                let healthy = self.probe(instance).await;
                let changed = if healthy {
                    instance.mark_success(self.config.healthy_threshold as usize)
                } else {
                    instance.mark_failure(self.config.unhealthy_threshold as usize)
                };
                if changed {
                    tracing::info!(
                        route = %route.id,
                        instance = %instance,
                        healthy = instance.is_healthy(),
                        "Instance health changed"
                    );
                }
                metrics::record_instance_health(&instance.to_string(), instance.is_healthy());
            }
        }
    }

    async fn probe(&self, instance: &Instance) -> bool {
        let base = instance.base_url.as_str().trim_end_matches('/');
        let uri = format!("{}{}", base, self.config.path);

        let request = match Request::builder()
            .method("GET")
            .uri(&uri)
            .header("user-agent", "api-gateway-health-check")
            .body(Body::empty())
        {
            Ok(req) => req,
            Err(e) => {
                tracing::error!(uri = %uri, error = %e, "Failed to build health check request");
                return false;
            }
        };

        let timeout = Duration::from_secs(self.config.timeout_secs);
        match time::timeout(timeout, self.client.request(request)).await {
            Ok(Ok(response)) => {
                let success = response.status().is_success();
                if !success {
                    tracing::warn!(uri = %uri, status = %response.status(), "Health check failed: non-success status");
                }
                success
            }
            Ok(Err(e)) => {
                tracing::warn!(uri = %uri, error = %e, "Health check failed: connection error");
                false
            }
            Err(_) => {
                tracing::warn!(uri = %uri, "Health check failed: timeout");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InstanceConfig, RouteConfig};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn status_backend(status_line: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    let response = format!("HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n", status_line);
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });
        format!("http://{}", addr)
    }

    fn router(urls: &[String]) -> Arc<Router> {
        let route = RouteConfig {
            id: "r".into(),
            path: "/r".into(),
            load_balancer: Default::default(),
            gray_release: None,
            filters: vec![],
            resilient: None,
            instances: urls
                .iter()
                .map(|url| InstanceConfig {
                    service_id: "svc".into(),
                    url: url.clone(),
                    weight: 1,
                    healthy: true,
                    gray: false,
                })
                .collect(),
        };
        Arc::new(Router::from_config(&[route], false).unwrap())
    }

    fn config() -> HealthCheckConfig {
        HealthCheckConfig {
            enabled: true,
            interval_secs: 1,
            timeout_secs: 1,
            path: "/health".into(),
            healthy_threshold: 1,
            unhealthy_threshold: 2,
        }
    }

    #[tokio::test]
    async fn test_unhealthy_after_threshold_and_recovery() {
        let ok = status_backend("200 OK").await;
        let failing = status_backend("500 Internal Server Error").await;
        let router = router(&[ok, failing]);
        let monitor = HealthMonitor::new(router.clone(), config());
        let routes = router.routes();
        let instances = &routes[0].instances;

        monitor.check_all().await;
        assert!(instances[0].is_healthy());
        assert!(instances[1].is_healthy());

        monitor.check_all().await;
        assert!(instances[0].is_healthy());
        assert!(!instances[1].is_healthy());
    }
}
