//! End-to-end tests for the proxy pipeline against a mock origin.

use std::time::Duration;

use bandwidth_hero_proxy::config::ProxyConfig;
use reqwest::StatusCode;

mod common;

use common::{
    client, sample_png, start_origin, start_proxy, start_streaming_origin, OriginReply,
};

fn proxy_url(proxy: std::net::SocketAddr, query: &str) -> String {
    format!("http://{}/?{}", proxy, query)
}

#[tokio::test]
async fn test_png_is_compressed_to_webp() {
    let png = sample_png(256, 256);
    let original_size = png.len() as i64;
    let (origin, recorded) = start_origin(OriginReply::new(200, "image/png", png)).await;
    let (proxy, shutdown) = start_proxy(ProxyConfig::default()).await;

    let target = format!("http://{}/photo.png", origin);
    let res = client()
        .get(proxy_url(proxy, &format!("url={}&l=30", target)))
        .header("cookie", "session=abc")
        .header("authorization", "Bearer nope")
        .send()
        .await
        .expect("Proxy unreachable");

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["content-type"], "image/webp");
    let original: i64 = res.headers()["x-original-size"].to_str().unwrap().parse().unwrap();
    let saved: i64 = res.headers()["x-bytes-saved"].to_str().unwrap().parse().unwrap();
    let length: i64 = res.headers()["content-length"].to_str().unwrap().parse().unwrap();

    let body = res.bytes().await.unwrap();
    assert_eq!(original, original_size);
    assert_eq!(length, body.len() as i64);
    assert_eq!(saved, original_size - body.len() as i64);
    assert_eq!(image::guess_format(&body).unwrap(), image::ImageFormat::WebP);

    let requests = recorded.lock().unwrap();
    assert_eq!(requests.len(), 1);
    let req = &requests[0];
    assert!(req.request_line.starts_with("GET /photo.png"));
    assert_eq!(req.header("via"), Some("1.1 bandwidth-hero"));
    assert_eq!(req.header("user-agent"), Some("Bandwidth-Hero Compressor"));
    assert_eq!(req.header("x-forwarded-for"), Some("127.0.0.1"));
    assert_eq!(req.header("cookie"), Some("session=abc"));
    assert_eq!(req.header("authorization"), None);

    shutdown.trigger();
}

#[tokio::test]
async fn test_compressed_response_keeps_caching_headers() {
    let reply = OriginReply::new(200, "image/png", sample_png(256, 256))
        .header("Cache-Control", "public, max-age=86400")
        .header("Last-Modified", "Wed, 21 Oct 2015 07:28:00 GMT")
        .header("Content-Encoding", "gzip");
    let (origin, _) = start_origin(reply).await;
    let (proxy, shutdown) = start_proxy(ProxyConfig::default()).await;

    let res = client()
        .get(proxy_url(proxy, &format!("url=http://{}/photo.png", origin)))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let h = res.headers();
    assert_eq!(h["content-type"], "image/webp");
    assert_eq!(h["cache-control"], "public, max-age=86400");
    assert_eq!(h["last-modified"], "Wed, 21 Oct 2015 07:28:00 GMT");
    assert_eq!(h["content-encoding"], "identity");
    assert!(h.get("x-proxy-bypass").is_none());
    let length: usize = h["content-length"].to_str().unwrap().parse().unwrap();

    let body = res.bytes().await.unwrap();
    assert_eq!(body.len(), length);
    assert_eq!(image::guess_format(&body).unwrap(), image::ImageFormat::WebP);

    shutdown.trigger();
}

#[tokio::test]
async fn test_jpeg_color_output() {
    let (origin, _) = start_origin(OriginReply::new(200, "image/png", sample_png(400, 400))).await;
    let (proxy, shutdown) = start_proxy(ProxyConfig::default()).await;

    let res = client()
        .get(proxy_url(proxy, &format!("url=http://{}/a.png&jpeg=1&bw=0", origin)))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["content-type"], "image/jpeg");
    let body = res.bytes().await.unwrap();
    let decoded = image::load_from_memory(&body).unwrap();
    assert_eq!(decoded.color(), image::ColorType::Rgb8);

    shutdown.trigger();
}

#[tokio::test]
async fn test_corrupt_image_redirects() {
    let garbage = vec![0xAB; 8 * 1024];
    let (origin, _) = start_origin(OriginReply::new(200, "image/jpeg", garbage)).await;
    let (proxy, shutdown) = start_proxy(ProxyConfig::default()).await;

    let target = format!("http://{}/broken.jpg", origin);
    let res = client()
        .get(proxy_url(proxy, &format!("url={}", target)))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(res.headers()["location"], target.as_str());
    assert!(res.headers().get("x-bytes-saved").is_none());
    assert!(res.bytes().await.unwrap().is_empty());

    shutdown.trigger();
}

#[tokio::test]
async fn test_non_image_is_passed_through() {
    let (origin, _) = start_origin(
        OriginReply::new(200, "text/plain", b"just some text".to_vec()).header("ETag", "\"t1\""),
    )
    .await;
    let (proxy, shutdown) = start_proxy(ProxyConfig::default()).await;

    let res = client()
        .get(proxy_url(proxy, &format!("url=http://{}/readme.txt", origin)))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let h = res.headers();
    assert_eq!(h["x-proxy-bypass"], "1");
    assert_eq!(h["content-type"], "text/plain");
    assert_eq!(h["content-length"], "14");
    assert_eq!(h["content-encoding"], "identity");
    assert_eq!(h["access-control-allow-origin"], "*");
    assert_eq!(h["cross-origin-resource-policy"], "cross-origin");
    assert_eq!(h["cross-origin-embedder-policy"], "unsafe-none");
    assert_eq!(h["etag"], "\"t1\"");
    assert!(h.get("content-range").is_none());
    assert!(h.get("accept-ranges").is_none());
    assert_eq!(&res.bytes().await.unwrap()[..], b"just some text");

    shutdown.trigger();
}

#[tokio::test]
async fn test_range_request_passes_through() {
    let (origin, recorded) = start_origin(
        OriginReply::new(206, "image/png", b"0123".to_vec())
            .header("Accept-Ranges", "bytes")
            .header("Content-Range", "bytes 0-3/90000"),
    )
    .await;
    let (proxy, shutdown) = start_proxy(ProxyConfig::default()).await;

    let res = client()
        .get(proxy_url(proxy, &format!("url=http://{}/big.png", origin)))
        .header("range", "bytes=0-3")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(res.headers()["content-range"], "bytes 0-3/90000");
    assert_eq!(res.headers()["accept-ranges"], "bytes");
    assert_eq!(recorded.lock().unwrap()[0].header("range"), Some("bytes=0-3"));

    shutdown.trigger();
}

#[tokio::test]
async fn test_origin_error_redirects_to_raw_url() {
    let (origin, _) = start_origin(OriginReply::new(404, "text/html", b"gone".to_vec())).await;
    let (proxy, shutdown) = start_proxy(ProxyConfig::default()).await;

    let target = format!("http://{}/missing.png", origin);
    let res = client()
        .get(proxy_url(proxy, &format!("url={}", target)))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(res.headers()["location"], target.as_str());

    shutdown.trigger();
}

#[tokio::test]
async fn test_unreachable_origin_redirects() {
    // bind then drop to get a port nothing listens on
    let addr = {
        let l = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        l.local_addr().unwrap()
    };
    let (proxy, shutdown) = start_proxy(ProxyConfig::default()).await;

    let target = format!("http://{}/a.png", addr);
    let res = client()
        .get(proxy_url(proxy, &format!("url={}", target)))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(res.headers()["location"], target.as_str());

    shutdown.trigger();
}

#[tokio::test]
async fn test_loop_marker_is_stripped_before_fetch() {
    let (origin, recorded) = start_origin(OriginReply::new(200, "text/plain", b"ok".to_vec())).await;
    let (proxy, shutdown) = start_proxy(ProxyConfig::default()).await;

    let res = client()
        .get(proxy_url(proxy, &format!("url=http://1.1.2.3/bmi/http://{}/a.txt", origin)))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(&res.bytes().await.unwrap()[..], b"ok");
    assert!(recorded.lock().unwrap()[0].request_line.starts_with("GET /a.txt"));

    shutdown.trigger();
}

#[tokio::test]
async fn test_self_loop_is_never_fetched() {
    let (origin, recorded) = start_origin(OriginReply::new(200, "text/plain", b"ok".to_vec())).await;
    let (proxy, shutdown) = start_proxy(ProxyConfig::default()).await;

    let target = format!("http://{}/a.png", origin);
    let res = client()
        .get(proxy_url(proxy, &format!("url={}", target)))
        .header("via", "1.1 bandwidth-hero")
        .header("x-forwarded-for", "127.0.0.1")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(res.headers()["location"], target.as_str());
    assert!(recorded.lock().unwrap().is_empty());

    shutdown.trigger();
}

#[tokio::test]
async fn test_missing_url_returns_sentinel() {
    let (proxy, shutdown) = start_proxy(ProxyConfig::default()).await;

    let res = client().get(proxy_url(proxy, "l=10&jpeg=1")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers()["via"].to_str().unwrap().starts_with("1.1 bandwidth-hero-"));
    assert_eq!(res.text().await.unwrap(), "1we23");

    shutdown.trigger();
}

#[tokio::test]
async fn test_invalid_url_is_rejected() {
    let (proxy, shutdown) = start_proxy(ProxyConfig::default()).await;

    let res = client()
        .get(proxy_url(proxy, "url=javascript:alert(1)"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(res.text().await.unwrap(), "Invalid URL");

    shutdown.trigger();
}

#[tokio::test]
async fn test_truncated_origin_body_aborts_client() {
    let reply = OriginReply {
        status: 200,
        headers: vec![
            ("Content-Type".into(), "application/octet-stream".into()),
            ("Content-Length".into(), "100000".into()),
        ],
        body: vec![7u8; 10],
    };
    let (origin, _) = start_origin(reply).await;
    let (proxy, shutdown) = start_proxy(ProxyConfig::default()).await;

    let res = client()
        .get(proxy_url(proxy, &format!("url=http://{}/blob.bin", origin)))
        .send()
        .await
        .unwrap();

    // headers were committed before the origin failed
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["content-length"], "100000");
    assert!(res.bytes().await.is_err());

    shutdown.trigger();
}

const STREAM_TOTAL: u64 = 256 * 1024 * 1024;

#[tokio::test]
async fn test_client_disconnect_releases_origin() {
    let origin = start_streaming_origin(STREAM_TOTAL).await;
    let (proxy, shutdown) = start_proxy(ProxyConfig::default()).await;

    let mut res = client()
        .get(proxy_url(proxy, &format!("url=http://{}/big.bin", origin.addr)))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["content-length"], STREAM_TOTAL.to_string().as_str());

    let first = res.chunk().await.unwrap().expect("no body bytes arrived");
    assert!(!first.is_empty());
    drop(res);

    let sent = tokio::time::timeout(Duration::from_secs(10), origin.finished)
        .await
        .expect("origin kept writing after the client left")
        .unwrap();
    assert!(sent < STREAM_TOTAL);

    shutdown.trigger();
}

#[tokio::test]
async fn test_slow_client_stalls_origin_writes() {
    let origin = start_streaming_origin(STREAM_TOTAL).await;
    let (proxy, shutdown) = start_proxy(ProxyConfig::default()).await;

    let mut res = client()
        .get(proxy_url(proxy, &format!("url=http://{}/big.bin", origin.addr)))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    res.chunk().await.unwrap().expect("no body bytes arrived");

    // the client stops reading; only socket and stream buffers can absorb more
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let stalled_at = origin.written();
    assert!(stalled_at > 0);
    assert!(
        stalled_at < STREAM_TOTAL / 4,
        "origin wrote {} bytes to a client that stopped reading",
        stalled_at
    );

    drop(res);
    shutdown.trigger();
}
