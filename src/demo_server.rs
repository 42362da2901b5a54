//! 示例数据生产者
//!
//! 模拟一个在 JSON 响应中上报 `db_latency_ms` 的后端：
//! - `GET /api/fetch-users`、`GET /api/fetch-products`：模拟一次数据存储查询并上报耗时
//! - `GET /api/non-db`：不访问数据存储，也不上报该字段
//! - `GET /`：带按钮的页面，便于在浏览器中产生 fetch 流量

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use anyhow::Context;
use axum::{
    Router,
    response::{Html, IntoResponse, Json},
    routing::get,
};
use serde::Serialize;
use serde_json::json;

use crate::decompose::DB_LATENCY_FIELD;

#[derive(Debug, Clone, Serialize)]
struct User {
    id: u32,
    name: &'static str,
    age: u32,
}

#[derive(Debug, Clone, Serialize)]
struct Product {
    id: u32,
    name: &'static str,
    price: f64,
}

const USERS: [User; 3] = [
    User { id: 1, name: "Alice", age: 24 },
    User { id: 2, name: "Bob", age: 30 },
    User { id: 3, name: "Charlie", age: 22 },
];

const PRODUCTS: [Product; 3] = [
    Product { id: 1, name: "Keyboard", price: 49.9 },
    Product { id: 2, name: "Monitor", price: 189.0 },
    Product { id: 3, name: "Mouse", price: 19.5 },
];

const INDEX_HTML: &str = r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>db-trace demo</title></head>
<body>
  <h1>db-trace demo</h1>
  <button onclick="call('/api/fetch-users')">Fetch users</button>
  <button onclick="call('/api/fetch-products')">Fetch products</button>
  <button onclick="call('/api/non-db')">Non-DB call</button>
  <pre id="out"></pre>
  <script>
    async function call(path) {
      const res = await fetch(path);
      document.getElementById('out').textContent = JSON.stringify(await res.json(), null, 2);
    }
  </script>
</body>
</html>"#;

/// 模拟一次数据存储访问，返回耗时（毫秒，保留两位小数）
async fn simulated_query() -> f64 {
    let start = Instant::now();
    tokio::time::sleep(Duration::from_millis(fastrand::u64(2..=25))).await;
    round2(start.elapsed().as_secs_f64() * 1000.0)
}

/// 模拟数据存储之外的处理耗时
async fn simulated_work() {
    tokio::time::sleep(Duration::from_millis(fastrand::u64(1..=10))).await;
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// GET /api/fetch-users
async fn fetch_users() -> impl IntoResponse {
    let db_latency_ms = simulated_query().await;
    simulated_work().await;
    Json(json!({ "data": USERS, DB_LATENCY_FIELD: db_latency_ms }))
}

/// GET /api/fetch-products
async fn fetch_products() -> impl IntoResponse {
    let db_latency_ms = simulated_query().await;
    simulated_work().await;
    Json(json!({ "data": PRODUCTS, DB_LATENCY_FIELD: db_latency_ms }))
}

/// GET /api/non-db
async fn non_db() -> impl IntoResponse {
    simulated_work().await;
    Json(json!({ "message": "no database access", "value": fastrand::u32(..1000) }))
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// 创建示例路由
pub fn router() -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/fetch-users", get(fetch_users))
        .route("/api/fetch-products", get(fetch_products))
        .route("/api/non-db", get(non_db))
}

/// 在指定地址上运行示例服务，直到进程退出
pub async fn serve(addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("绑定地址失败: {}", addr))?;
    tracing::info!("示例服务已启动: http://{}", listener.local_addr()?);
    axum::serve(listener, router())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("示例服务异常退出")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decompose::extract_db_latency;

    async fn spawn() -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router()).await.unwrap();
        });
        addr
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(12.3456), 12.35);
        assert_eq!(round2(3.0), 3.0);
    }

    #[tokio::test]
    async fn test_db_endpoints_report_latency() {
        let addr = spawn().await;
        let client = reqwest::Client::new();

        for path in ["/api/fetch-users", "/api/fetch-products"] {
            let body: serde_json::Value = client
                .get(format!("http://{}{}", addr, path))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            let db = extract_db_latency(&body).unwrap();
            assert!(db >= 2.0, "{} 上报 {}", path, db);
            assert_eq!(body["data"].as_array().unwrap().len(), 3);
        }
    }

    #[tokio::test]
    async fn test_non_db_endpoint_omits_field() {
        let addr = spawn().await;
        let body: serde_json::Value = reqwest::get(format!("http://{}/api/non-db", addr))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(body.get(DB_LATENCY_FIELD).is_none());
    }
}
