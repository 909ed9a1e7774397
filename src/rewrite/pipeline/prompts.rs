//! 提示词构造
//!
//! 每个片段生成一对 system + user 消息，措辞取决于任务类型；从右到左的片段在 system 消息末尾追加方向提醒。

use crate::rewrite::llm::ChatMessage;
use crate::rewrite::models::{Fragment, ProcessingConfig, Task};

const DEFAULT_CUSTOM_INSTRUCTION: &str = "Process this text:";

const RTL_REMINDER: &str =
    " The text is in a right-to-left (RTL) language; make sure to preserve this characteristic.";

/// 为片段构造消息
pub fn build_messages(fragment: &Fragment, config: &ProcessingConfig) -> Vec<ChatMessage> {
    let language = &config.language;
    let text = &fragment.text;

    let (mut system, user) = match config.task {
        Task::Rewrite => (
            format!(
                "You are an expert text rewriting assistant working in {language}. \
                 Rewrite the text keeping its original meaning but using different words. \
                 Keep the same tone and level of formality. \
                 If the text contains HTML or code, preserve it exactly. \
                 Reply with the rewritten text only."
            ),
            format!("Rewrite this text: {text}"),
        ),
        Task::Summarize => (
            format!(
                "You are an expert summarization assistant working in {language}. \
                 Summarize the text keeping the key points and essential meaning. \
                 If the text contains HTML or code, preserve it as far as possible. \
                 Reply with the summary only."
            ),
            format!("Summarize this text: {text}"),
        ),
        Task::Custom => {
            let instruction = config
                .custom_prompt
                .as_deref()
                .map(str::trim)
                .filter(|prompt| !prompt.is_empty())
                .unwrap_or(DEFAULT_CUSTOM_INSTRUCTION);
            (
                format!(
                    "You are an expert text processing assistant working in {language}. \
                     Follow the instructions exactly."
                ),
                format!("{instruction} {text}"),
            )
        }
    };

    if fragment.is_rtl {
        system.push_str(RTL_REMINDER);
    }

    vec![ChatMessage::system(system), ChatMessage::user(user)]
}
