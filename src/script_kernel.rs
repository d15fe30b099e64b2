use async_trait::async_trait;
use serde_json::{json, Value};
use weave_kernel::{command::SubmitCode, Kernel, KernelContext, KernelError};

/// Line-oriented kernel bundled with the host.
///
/// Each non-empty line is one of:
/// - `print <text>` writes the text to standard output
/// - `input <prompt>` asks for a value and shows it
/// - `password <prompt>` asks for a hidden value and shows it masked
/// - a JSON literal, which is shown as a value
pub struct ScriptKernel;

pub const NAME: &str = "script";

#[async_trait]
impl Kernel for ScriptKernel {
    fn name(&self) -> &str {
        NAME
    }

    async fn submit_code(
        &self,
        submission: &SubmitCode,
        context: &mut KernelContext,
    ) -> Result<(), KernelError> {
        for (number, line) in submission.code.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            context.checkpoint()?;

            let (keyword, rest) = line.split_once(' ').unwrap_or((line, ""));
            match keyword {
                "print" => context.write_stdout(rest).await?,
                "input" => {
                    let value = context.request_input(rest, false).await?;
                    context.display_value(&json!(value)).await?;
                }
                "password" => {
                    let value = context.request_input(rest, true).await?;
                    let masked = "*".repeat(value.chars().count());
                    context.display_value(&json!(masked)).await?;
                }
                _ => {
                    let value: Value = serde_json::from_str(line).map_err(|e| {
                        KernelError::Execution(format!("line {}: {e}", number + 1))
                    })?;
                    context.display_value(&value).await?;
                }
            }
        }
        Ok(())
    }
}
