use std::io::ErrorKind;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{SpeechEngine, SynthesisError};

/// Replaced with the path the audio must be written to.
const OUTPUT_PLACEHOLDER: &str = "{output}";

/// Replaced with the story text, when absent the text is piped on stdin.
const TEXT_PLACEHOLDER: &str = "{text}";

/// Narrates by running a local speech synthesis program, e.g. `espeak-ng`.
///
/// The child is killed if the synthesis future is dropped, so a deadline
/// applied by the caller does not leave stray processes behind.
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
}

impl CommandEngine {
    pub fn new(program: String, args: Vec<String>) -> Self {
        Self { program, args }
    }

    fn takes_text_as_argument(&self) -> bool {
        self.args.iter().any(|arg| arg.contains(TEXT_PLACEHOLDER))
    }
}

#[async_trait]
impl SpeechEngine for CommandEngine {
    async fn synthesize(&self, text: &str, output: &Path) -> Result<(), SynthesisError> {
        let output = output.to_string_lossy();
        let args = self.args.iter().map(|arg| {
            arg.replace(OUTPUT_PLACEHOLDER, &output)
                .replace(TEXT_PLACEHOLDER, text)
        });

        let pipe_text = !self.takes_text_as_argument();
        let stdin = if pipe_text { Stdio::piped() } else { Stdio::null() };

        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(stdin)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(SynthesisError::Spawn)?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(text.as_bytes()).await {
                // The exit status tells the real story when the program ignores stdin.
                Err(ref e) if e.kind() == ErrorKind::BrokenPipe => {},
                Err(e) => return Err(SynthesisError::Io(e)),
                Ok(()) => {},
            }
        }

        let out = child.wait_with_output().await.map_err(SynthesisError::Io)?;
        if !out.status.success() {
            return Err(SynthesisError::EngineFailed {
                status: out.status.code(),
                stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use super::*;

    fn sh(script: &str, extra: &[&str]) -> CommandEngine {
        let mut args = vec!["-c".to_string(), script.to_string()];
        args.extend(extra.iter().map(|s| s.to_string()));
        CommandEngine::new("sh".to_string(), args)
    }

    #[tokio::test]
    async fn test_text_is_piped_to_stdin() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let output = dir.path().join("out.mp3");

        sh("cat > \"$0\"", &["{output}"])
            .synthesize("a poem about rain", &output)
            .await?;

        assert_eq!(tokio::fs::read_to_string(&output).await?, "a poem about rain");
        Ok(())
    }

    #[tokio::test]
    async fn test_text_placeholder() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let output = dir.path().join("out.mp3");

        sh("printf '%s' \"$1\" > \"$0\"", &["{output}", "{text}"])
            .synthesize("inline text", &output)
            .await?;

        assert_eq!(tokio::fs::read_to_string(&output).await?, "inline text");
        Ok(())
    }

    #[tokio::test]
    async fn test_failing_program() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let output = dir.path().join("out.mp3");

        let err = sh("echo 'no voices installed' >&2; exit 3", &[])
            .synthesize("text", &output)
            .await
            .unwrap_err();

        match err {
            SynthesisError::EngineFailed { status, stderr } => {
                assert_eq!(status, Some(3));
                assert_eq!(stderr, "no voices installed");
            },
            other => panic!("unexpected error {:?}", other),
        }

        Ok(())
    }

    #[tokio::test]
    async fn test_missing_program() {
        let engine = CommandEngine::new("definitely-not-a-speech-engine".to_string(), vec![]);
        let err = engine
            .synthesize("text", Path::new("/tmp/never-written.mp3"))
            .await
            .unwrap_err();

        assert!(matches!(err, SynthesisError::Spawn(_)));
    }

    #[tokio::test]
    async fn test_dropped_future_stops_waiting() {
        let engine = sh("sleep 30", &[]);
        let res = tokio::time::timeout(
            Duration::from_millis(200),
            engine.synthesize("text", Path::new("/tmp/never-written.mp3")),
        )
        .await;

        assert!(res.is_err());
    }
}
