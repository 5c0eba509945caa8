//! Integration tests for the clai library.
//! These tests run against a mock Ollama server or the offline backend.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures::stream;

    use serde_json::{Value, json};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use clai::approval::Operator;
    use clai::{
        ApprovalLoop, ApprovalOutcome, Backend, BufferRenderer, ChatSession, ChatStore, ChunkStream,
        ClaiConfig, Clipboard, CommandGenerator, DummyBackend, Error, MemoryStore, OllamaClient,
        Role, SendRequest, ShellExecutor, StreamChunk, web,
    };

    const NDJSON: &str = concat!(
        "{\"model\":\"llama3\",\"response\":\"Use \",\"done\":false}\n",
        "{\"model\":\"llama3\",\"response\":\"du -sh\",\"done\":false}\n",
        "{\"model\":\"llama3\",\"response\":\"\",\"done\":true}\n",
    );

    struct Answers(Vec<String>);

    impl Operator for Answers {
        fn read_choice(&mut self) -> clai::Result<Option<String>> {
            Ok(if self.0.is_empty() {
                None
            } else {
                Some(self.0.remove(0))
            })
        }

        fn edit_line(&mut self, _: &str) -> clai::Result<Option<String>> {
            self.read_choice()
        }
    }

    struct NoClipboard;

    impl Clipboard for NoClipboard {
        fn copy(&mut self, _: &str) -> clai::Result<()> {
            Err(Error::clipboard("unavailable in tests"))
        }
    }

    #[tokio::test]
    async fn streamed_chat_is_recorded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(json!({"model": "llama3", "stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(NDJSON, "application/x-ndjson"))
            .expect(1)
            .mount(&server)
            .await;

        let config = ClaiConfig::new()
            .with_model("llama3")
            .with_base_url(server.uri());
        let client = OllamaClient::from_config(&config).unwrap();
        let session = ChatSession::new(client, MemoryStore::new(), config);
        session.create_conversation("c1", "Disk").await.unwrap();

        let mut relayed = Vec::new();
        let reply = session
            .send_streaming(SendRequest::new("c1", "how big is this dir?"), |chunk| {
                relayed.push(chunk.to_string());
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(relayed, vec!["Use ", "du -sh"]);
        assert_eq!(reply.content, "Use du -sh");

        let full = session.conversation_with_messages("c1").await.unwrap();
        assert_eq!(full.messages.len(), 2);
        assert_eq!(full.messages[0].role, Role::User);
        assert_eq!(full.messages[1].content, "Use du -sh");
    }

    #[tokio::test]
    async fn oversized_prompt_never_reaches_backend() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let config = ClaiConfig::new()
            .with_base_url(server.uri())
            .with_max_prompt_length(10);
        let session = ChatSession::new(
            OllamaClient::from_config(&config).unwrap(),
            MemoryStore::new(),
            config.clone(),
        );
        session.create_conversation("c1", "").await.unwrap();
        let err = session
            .send(SendRequest::new("c1", "this prompt is far too long"))
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert!(config.validate_prompt("short").is_ok());
        assert!(session.store().messages("c1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_model_is_actionable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(json!({"error": "model \"nope\" not found, try pulling it first"})),
            )
            .mount(&server)
            .await;

        let config = ClaiConfig::new().with_model("nope").with_base_url(server.uri());
        let generator = CommandGenerator::new(OllamaClient::from_config(&config).unwrap(), &config);
        let err = generator.generate("list files").await.unwrap_err();
        assert!(matches!(err, Error::ModelNotFound { .. }));
        assert!(err.to_string().contains("ollama pull nope"));
    }

    #[tokio::test]
    async fn dummy_generator_scenarios() {
        let config = ClaiConfig::new().with_dummy(true);
        let generator = CommandGenerator::new(DummyBackend, &config);
        assert_eq!(generator.generate("list files").await.unwrap(), "ls -la");
        assert_eq!(generator.generate("show me disk usage").await.unwrap(), "df -h");
        assert_eq!(
            generator.generate("do something else").await.unwrap(),
            "echo 'Dummy command for: do something else'"
        );
        assert_eq!(clai::sanitize_command("`ls -la`"), "ls -la");
    }

    #[test]
    fn approved_command_runs_in_a_shell() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let command = format!("touch '{}'", marker.display());

        let mut operator = Answers(vec!["Y".to_string()]);
        let mut clipboard = NoClipboard;
        let mut executor = ShellExecutor::new();
        let mut renderer = BufferRenderer::new();
        let outcome = ApprovalLoop::new(&mut operator, &mut clipboard, &mut executor)
            .run(command.clone(), &mut renderer)
            .unwrap();
        assert_eq!(outcome, ApprovalOutcome::Executed(command));
        assert!(marker.exists());
    }

    #[test]
    fn edited_command_runs_instead() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("original");
        let edited = dir.path().join("edited");

        let mut operator = Answers(vec![
            "e".to_string(),
            format!("touch '{}'", edited.display()),
            "yes".to_string(),
        ]);
        let mut clipboard = NoClipboard;
        let mut executor = ShellExecutor::new();
        let mut renderer = BufferRenderer::new();
        ApprovalLoop::new(&mut operator, &mut clipboard, &mut executor)
            .run(format!("touch '{}'", original.display()), &mut renderer)
            .unwrap();
        assert!(edited.exists());
        assert!(!original.exists());
    }

    #[test]
    fn failing_command_reports_exit_status() {
        let mut operator = Answers(vec![String::new()]);
        let mut clipboard = NoClipboard;
        let mut executor = ShellExecutor::new();
        let mut renderer = BufferRenderer::new();
        let err = ApprovalLoop::new(&mut operator, &mut clipboard, &mut executor)
            .run("exit 4".to_string(), &mut renderer)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ExecutionFailed {
                exit_code: Some(4),
                ..
            }
        ));
    }

    /// Streams `total` words, one every `pause`, counting how many were pulled.
    struct SlowBackend {
        total: usize,
        pause: Duration,
        pulled: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Backend for SlowBackend {
        async fn generate(&self, _: &str, _: &str, _: Duration) -> clai::Result<String> {
            Ok("slow".to_string())
        }

        async fn stream(&self, _: &str, _: &str) -> clai::Result<ChunkStream> {
            let total = self.total;
            let pause = self.pause;
            let pulled = Arc::clone(&self.pulled);
            Ok(Box::pin(stream::unfold(0, move |n| {
                let pulled = Arc::clone(&pulled);
                async move {
                    if n > total {
                        return None;
                    }
                    tokio::time::sleep(pause).await;
                    pulled.fetch_add(1, Ordering::SeqCst);
                    let chunk = if n == total {
                        StreamChunk::done()
                    } else {
                        StreamChunk::text(format!("w{n} "))
                    };
                    Some((Ok(chunk), n + 1))
                }
            })))
        }
    }

    async fn spawn_server() -> String {
        spawn_server_with(DummyBackend).await
    }

    async fn spawn_server_with<B: Backend + 'static>(backend: B) -> String {
        let config = ClaiConfig::new().with_dummy(true);
        let session = Arc::new(ChatSession::new(backend, MemoryStore::new(), config));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, web::router(session)).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn web_conversation_lifecycle() {
        let base = spawn_server().await;
        let http = reqwest::Client::new();

        let health: Value = http
            .get(format!("{base}/health"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health, json!({"status": "ok"}));

        let created = http
            .post(format!("{base}/api/chats"))
            .json(&json!({"id": "c1"}))
            .send()
            .await
            .unwrap();
        assert_eq!(created.status(), 201);
        let created: Value = created.json().await.unwrap();
        assert_eq!(created["title"], "New Chat");

        let missing_id = http
            .post(format!("{base}/api/chats"))
            .json(&json!({"title": "x"}))
            .send()
            .await
            .unwrap();
        assert_eq!(missing_id.status(), 400);

        let duplicate = http
            .post(format!("{base}/api/chats"))
            .json(&json!({"id": "c1"}))
            .send()
            .await
            .unwrap();
        assert_eq!(duplicate.status(), 409);

        let reply = http
            .post(format!("{base}/api/chats/c1/send"))
            .json(&json!({"userMessageId": "u1", "content": "hi"}))
            .send()
            .await
            .unwrap();
        assert_eq!(reply.status(), 201);
        let reply: Value = reply.json().await.unwrap();
        assert_eq!(reply["role"], "assistant");
        assert_eq!(reply["content"], "Dummy response to: hi");

        let streamed = http
            .post(format!("{base}/api/chats/c1/send"))
            .json(&json!({"userMessageId": "u2", "content": "again", "stream": true}))
            .send()
            .await
            .unwrap();
        assert_eq!(streamed.status(), 200);
        assert!(
            streamed.headers()["content-type"]
                .to_str()
                .unwrap()
                .starts_with("text/event-stream")
        );
        let body = streamed.text().await.unwrap();
        let events: Vec<Value> = body
            .lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .map(|data| serde_json::from_str(data).unwrap())
            .collect();
        let text: String = events
            .iter()
            .filter(|e| e["type"] == "chunk")
            .map(|e| e["content"].as_str().unwrap())
            .collect();
        assert_eq!(text, "Dummy response to: again");
        let last = events.last().unwrap();
        assert_eq!(last["type"], "done");
        assert_eq!(last["message"]["content"], "Dummy response to: again");

        let renamed = http
            .put(format!("{base}/api/chats/c1"))
            .json(&json!({"title": "Greetings"}))
            .send()
            .await
            .unwrap();
        assert_eq!(renamed.status(), 200);
        let empty_title = http
            .put(format!("{base}/api/chats/c1"))
            .json(&json!({"title": ""}))
            .send()
            .await
            .unwrap();
        assert_eq!(empty_title.status(), 400);

        let chat: Value = http
            .get(format!("{base}/api/chats/c1"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(chat["title"], "Greetings");
        let roles: Vec<&str> = chat["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, vec!["user", "assistant", "user", "assistant"]);

        let deleted = http
            .delete(format!("{base}/api/chats/c1"))
            .send()
            .await
            .unwrap();
        assert_eq!(deleted.status(), 204);

        let gone = http
            .get(format!("{base}/api/chats/c1"))
            .send()
            .await
            .unwrap();
        assert_eq!(gone.status(), 404);
        let body: Value = gone.json().await.unwrap();
        assert_eq!(body["error"], "Not Found");
        assert!(body["message"].as_str().unwrap().contains("c1"));
    }

    #[tokio::test]
    async fn web_send_validation() {
        let base = spawn_server().await;
        let http = reqwest::Client::new();

        let unknown = http
            .post(format!("{base}/api/chats/nope/send"))
            .json(&json!({"userMessageId": "u1", "content": "hi", "stream": true}))
            .send()
            .await
            .unwrap();
        assert_eq!(unknown.status(), 404);

        http.post(format!("{base}/api/chats"))
            .json(&json!({"id": "c1", "title": "t"}))
            .send()
            .await
            .unwrap();
        let no_id = http
            .post(format!("{base}/api/chats/c1/send"))
            .json(&json!({"content": "hi"}))
            .send()
            .await
            .unwrap();
        assert_eq!(no_id.status(), 400);

        let not_json = http
            .post(format!("{base}/api/chats/c1/send"))
            .header("content-type", "application/json")
            .body("{")
            .send()
            .await
            .unwrap();
        assert_eq!(not_json.status(), 400);
        let body: Value = not_json.json().await.unwrap();
        assert_eq!(body["error"], "Bad Request");

        http.post(format!("{base}/api/chats/c1/send"))
            .json(&json!({"userMessageId": "u1", "content": "hi"}))
            .send()
            .await
            .unwrap();
        let reused = http
            .post(format!("{base}/api/chats/c1/send"))
            .json(&json!({"userMessageId": "u1", "content": "again", "stream": true}))
            .send()
            .await
            .unwrap();
        assert_eq!(reused.status(), 409);
        let body: Value = reused.json().await.unwrap();
        assert_eq!(body["error"], "Conflict");
    }

    async fn chat_roles(http: &reqwest::Client, base: &str, id: &str) -> Vec<String> {
        let chat: Value = http
            .get(format!("{base}/api/chats/{id}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        chat["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["role"].as_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn web_stream_client_disconnect_keeps_only_user_message() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let base = spawn_server_with(SlowBackend {
            total: 40,
            pause: Duration::from_millis(25),
            pulled: Arc::clone(&pulled),
        })
        .await;
        let http = reqwest::Client::new();
        http.post(format!("{base}/api/chats"))
            .json(&json!({"id": "c1"}))
            .send()
            .await
            .unwrap();

        let mut streamed = reqwest::Client::new()
            .post(format!("{base}/api/chats/c1/send"))
            .json(&json!({"userMessageId": "u1", "content": "talk slowly", "stream": true}))
            .send()
            .await
            .unwrap();
        assert_eq!(streamed.status(), 200);
        let mut seen = String::new();
        while !seen.contains("\n\n") {
            let bytes = streamed.chunk().await.unwrap().unwrap();
            seen.push_str(&String::from_utf8_lossy(&bytes));
        }
        let first: Value =
            serde_json::from_str(seen.lines().find_map(|l| l.strip_prefix("data: ")).unwrap())
                .unwrap();
        assert_eq!(first["type"], "chunk");
        drop(streamed);

        // Long enough for the whole reply had the stream kept going.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(chat_roles(&http, &base, "c1").await, vec!["user"]);
        assert!(pulled.load(Ordering::SeqCst) < 41);
    }

    #[tokio::test]
    async fn web_stream_backend_error_ends_with_error_event() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                concat!(
                    "{\"model\":\"llama3\",\"response\":\"Par\",\"done\":false}\n",
                    "{\"error\":\"out of memory\"}\n",
                ),
                "application/x-ndjson",
            ))
            .mount(&server)
            .await;
        let config = ClaiConfig::new()
            .with_model("llama3")
            .with_base_url(server.uri());
        let base = spawn_server_with(OllamaClient::from_config(&config).unwrap()).await;
        let http = reqwest::Client::new();
        http.post(format!("{base}/api/chats"))
            .json(&json!({"id": "c1"}))
            .send()
            .await
            .unwrap();

        let streamed = http
            .post(format!("{base}/api/chats/c1/send"))
            .json(&json!({"userMessageId": "u1", "content": "hello", "stream": true, "model": "llama3"}))
            .send()
            .await
            .unwrap();
        assert_eq!(streamed.status(), 200);
        let body = streamed.text().await.unwrap();
        let events: Vec<Value> = body
            .lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .map(|data| serde_json::from_str(data).unwrap())
            .collect();
        assert_eq!(events[0]["type"], "chunk");
        assert_eq!(events[0]["content"], "Par");
        let last = events.last().unwrap();
        assert_eq!(last["type"], "error");
        assert!(last["error"].as_str().unwrap().contains("out of memory"));
        assert!(events.iter().all(|e| e["type"] != "done"));

        assert_eq!(chat_roles(&http, &base, "c1").await, vec!["user"]);
    }
}
