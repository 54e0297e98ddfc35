use async_trait::async_trait;

use confab_foundation::SessionError;

/// Narrow text-generation capability consumed by memory/summarization code.
///
/// Keeping this to a single method decouples those consumers from the
/// concrete remote SDK type; they depend on "something that turns a prompt
/// into text", nothing more.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate_text(&self, prompt: &str) -> Result<String, SessionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn consumers_depend_only_on_the_trait() {
        let mut generator = MockTextGenerator::new();
        generator
            .expect_generate_text()
            .withf(|prompt| prompt.contains("summarize"))
            .returning(|_| Ok("a short summary".to_string()));

        async fn summarize(
            generator: &dyn TextGenerator,
            notes: &str,
        ) -> Result<String, SessionError> {
            generator
                .generate_text(&format!("summarize: {notes}"))
                .await
        }

        let summary = summarize(&generator, "long conversation").await.unwrap();
        assert_eq!(summary, "a short summary");
    }
}
