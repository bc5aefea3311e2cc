use fanout_research::context::{ContextItem, ContextSource};
use fanout_research::provider::{ProviderError, TextGenerator};
use fanout_research::providers::openai_compat::OpenAiCompatibleGenerator;
use fanout_research::providers::openai_embeddings::OpenAiCompatibleEmbedder;
use fanout_research::retrieval::{Embedder, EmbeddingScorer, RelevanceScorer, RetrievalError};
use std::sync::Arc;
use futures_util::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Serve one HTTP exchange with a canned response. The handle yields the raw request.
async fn serve_once(
    status_line: &'static str,
    content_type: &'static str,
    body: String,
) -> (String, tokio::task::JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&request).to_string();
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if request.len() >= header_end + 4 + content_length {
                    break;
                }
            }
        }

        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status_line,
            content_type,
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.unwrap();
        String::from_utf8_lossy(&request).to_string()
    });

    (base_url, handle)
}

fn delta(content: &str) -> String {
    format!(
        "data: {{\"choices\":[{{\"delta\":{{\"content\":\"{}\"}}}}]}}\n\n",
        content
    )
}

#[tokio::test]
async fn test_streams_fragments_from_sse_body() {
    fanout_research::init_logger();

    let body = format!("{}{}data: [DONE]\n\n", delta("Hel"), delta("lo"));
    let (base_url, server) = serve_once("200 OK", "text/event-stream", body).await;
    let generator = OpenAiCompatibleGenerator::new_with_base_url("sk-test", &base_url);

    let fragments: Vec<Result<String, ProviderError>> = generator
        .generate("gpt-4o", "Say hello")
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(fragments, vec![Ok("Hel".to_string()), Ok("lo".to_string())]);

    let request = server.await.unwrap();
    assert!(request.starts_with("POST /v1/chat/completions"));
    assert!(request.to_lowercase().contains("authorization: bearer sk-test"));
    assert!(request.contains("\"stream\":true"));
    assert!(request.contains("\"model\":\"gpt-4o\""));
    assert!(request.contains("Say hello"));
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let (base_url, server) = serve_once(
        "503 Service Unavailable",
        "application/json",
        "{\"error\":\"overloaded\"}".to_string(),
    )
    .await;
    let generator = OpenAiCompatibleGenerator::new_with_base_url("sk-test", &base_url);

    let err = match generator.generate("gpt-4o", "hi").await {
        Err(err) => err,
        Ok(_) => panic!("expected an error for HTTP 503"),
    };
    assert!(err.is_transient());
    assert!(err.message().contains("503"));
    server.await.unwrap();
}

#[tokio::test]
async fn test_client_error_is_terminal() {
    let (base_url, server) = serve_once(
        "400 Bad Request",
        "application/json",
        "{\"error\":\"unknown model\"}".to_string(),
    )
    .await;
    let generator = OpenAiCompatibleGenerator::new_with_base_url("sk-test", &base_url);

    let err = match generator.generate("no-such-model", "hi").await {
        Err(err) => err,
        Ok(_) => panic!("expected an error for HTTP 400"),
    };
    assert!(!err.is_transient());
    assert!(err.message().contains("unknown model"));
    server.await.unwrap();
}

#[tokio::test]
async fn test_unreachable_endpoint_is_transient() {
    // Bind then drop to get a local port with nothing listening.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let generator = OpenAiCompatibleGenerator::new_with_base_url("sk-test", &base_url);
    let err = match generator.generate("gpt-4o", "hi").await {
        Err(err) => err,
        Ok(_) => panic!("expected a connection error"),
    };
    assert!(matches!(err, ProviderError::Unavailable(_)));
}

#[tokio::test]
async fn test_stream_without_done_marker_is_an_error() {
    let body = delta("partial");
    let (base_url, server) = serve_once("200 OK", "text/event-stream", body).await;
    let generator = OpenAiCompatibleGenerator::new_with_base_url("sk-test", &base_url);

    let fragments: Vec<Result<String, ProviderError>> = generator
        .generate("gpt-4o", "hi")
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(fragments.len(), 2);
    assert_eq!(fragments[0], Ok("partial".to_string()));
    assert_eq!(
        fragments[1],
        Err(ProviderError::Unavailable("stream ended before [DONE]".into()))
    );
    server.await.unwrap();
}

#[tokio::test]
async fn test_embeddings_follow_input_order() {
    fanout_research::init_logger();

    // Entries come back out of order; the index field decides placement.
    let body = r#"{"object":"list","data":[
        {"object":"embedding","index":1,"embedding":[0.0,1.0]},
        {"object":"embedding","index":0,"embedding":[1.0,0.0]}
    ],"model":"text-embedding-3-small"}"#
        .to_string();
    let (base_url, server) = serve_once("200 OK", "application/json", body).await;
    let embedder = OpenAiCompatibleEmbedder::new_with_base_url("sk-test", &base_url);

    let vectors = embedder
        .embed(&["query".to_string(), "item".to_string()])
        .await
        .unwrap();
    assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);

    let request = server.await.unwrap();
    assert!(request.starts_with("POST /v1/embeddings"));
    assert!(request.to_lowercase().contains("authorization: bearer sk-test"));
    assert!(request.contains("\"model\":\"text-embedding-3-small\""));
    assert!(request.contains("\"input\":[\"query\",\"item\"]"));
}

#[tokio::test]
async fn test_embedding_scorer_ranks_through_http_embedder() {
    let body = r#"{"data":[
        {"index":0,"embedding":[1.0,0.0]},
        {"index":1,"embedding":[0.0,1.0]},
        {"index":2,"embedding":[1.0,0.0]}
    ]}"#
    .to_string();
    let (base_url, server) = serve_once("200 OK", "application/json", body).await;
    let embedder = OpenAiCompatibleEmbedder::new_with_base_url("sk-test", &base_url)
        .with_model("nomic-embed-text");
    let scorer = EmbeddingScorer::new(Arc::new(embedder));

    let scored = scorer
        .score(
            "q",
            vec![
                ContextItem::new(ContextSource::Arxiv, "unrelated"),
                ContextItem::new(ContextSource::WebSearch, "on topic"),
            ],
        )
        .await
        .unwrap();

    assert_eq!(scored[0].relevance, Some(0.0));
    assert_eq!(scored[1].relevance, Some(1.0));
    assert!(server.await.unwrap().contains("nomic-embed-text"));
}

#[tokio::test]
async fn test_embedding_endpoint_error_is_reported() {
    let (base_url, server) = serve_once(
        "401 Unauthorized",
        "application/json",
        "{\"error\":\"bad key\"}".to_string(),
    )
    .await;
    let embedder = OpenAiCompatibleEmbedder::new_with_base_url("sk-wrong", &base_url);

    let err = embedder.embed(&["q".to_string()]).await.unwrap_err();
    assert!(matches!(err, RetrievalError::Embedding(ref msg) if msg.contains("401")));
    server.await.unwrap();
}
