use tracing::warn;

use crate::errors::StageError;
use crate::llm_client::{LlmClient, LlmError};
use crate::pipeline::prompts::schema_retry_suffix;

/// Calls the model and validates the answer with `parse`. On a schema failure the
/// failing raw output is appended to the prompt and the call is retried, up to
/// `schema_retries` extra times. A malformed response envelope or blank content counts
/// as a schema failure too. Other transport failures are returned immediately; the
/// client has already retried those with backoff.
pub async fn complete_validated<T, F>(
    llm: &LlmClient,
    stage: &str,
    base_prompt: &str,
    system: &str,
    schema_retries: u32,
    parse: F,
) -> Result<T, StageError>
where
    F: Fn(&str) -> Result<T, String>,
{
    let attempts = schema_retries + 1;
    let mut prompt = base_prompt.to_string();
    let mut last_detail = String::new();

    for attempt in 1..=attempts {
        let raw = match llm.complete(&prompt, system).await {
            Ok(raw) => raw,
            Err(e @ (LlmError::Parse(_) | LlmError::EmptyContent)) => {
                let detail = e.to_string();
                warn!("{stage} response unusable (attempt {attempt}/{attempts}): {detail}");
                prompt = format!("{base_prompt}{}", schema_retry_suffix(&detail, ""));
                last_detail = detail;
                continue;
            }
            Err(e) => return Err(StageError::Transport(e)),
        };

        match parse(&raw) {
            Ok(value) => return Ok(value),
            Err(detail) => {
                warn!("{stage} answer failed validation (attempt {attempt}/{attempts}): {detail}");
                prompt = format!("{base_prompt}{}", schema_retry_suffix(&detail, &raw));
                last_detail = detail;
            }
        }
    }

    Err(StageError::SchemaValidation {
        attempts,
        detail: last_detail,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::testing::{chat_body, client};
    use wiremock::matchers::{body_string_contains, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn parse_number(raw: &str) -> Result<u32, String> {
        raw.trim()
            .parse::<u32>()
            .map_err(|_| format!("'{raw}' is not a number"))
    }

    #[tokio::test]
    async fn test_retry_prompt_carries_failing_output() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("not a number"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("42")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("forty-two")))
            .expect(1)
            .mount(&server)
            .await;

        let llm = client(&server.uri());
        let value = complete_validated(&llm, "test", "give a number", "sys", 2, parse_number)
            .await
            .unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_malformed_envelope_uses_schema_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"choices\": \"oops\"}"))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("7")))
            .expect(1)
            .mount(&server)
            .await;

        let llm = client(&server.uri());
        let value = complete_validated(&llm, "test", "give a number", "sys", 2, parse_number)
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_server_error_is_transport_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let llm = client(&server.uri());
        let err = complete_validated(&llm, "test", "give a number", "sys", 2, parse_number)
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Transport(LlmError::Api { status: 503, .. })));
    }

    #[tokio::test]
    async fn test_exhausted_schema_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("nope")))
            .expect(3)
            .mount(&server)
            .await;

        let llm = client(&server.uri());
        let err = complete_validated(&llm, "test", "give a number", "sys", 2, parse_number)
            .await
            .unwrap_err();
        match err {
            StageError::SchemaValidation { attempts, detail } => {
                assert_eq!(attempts, 3);
                assert!(detail.contains("nope"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
