//! Prompt 模板：规划、行动、反思、重要度评分

use crate::tools::COMPLETE_ACTION;

/// 所有主循环补全请求共用的 system prompt
pub const SYSTEM_PROMPT: &str = "You are an autonomous agent working towards an objective. \
You can use the listed capabilities. Be concise and act one step at a time.";

/// 上一步工具输出为空时的占位
pub const NO_PREVIOUS_OUTPUT: &str = "none";

/// 拼接检索到的记忆；为空时返回空串
pub fn memory_section(memories: &[String]) -> String {
    if memories.is_empty() {
        return String::new();
    }
    let mut s = String::from("Here are some relevant memories for you:\n");
    for m in memories {
        s.push_str("* ");
        s.push_str(m);
        s.push('\n');
    }
    s.trim_end().to_string()
}

pub fn planning_prompt(objective: &str, capabilities: &str, memories: &[String]) -> String {
    format!(
        "You are an intelligent agent that is given the following objective: {objective}.\n\
{memories}\n\n\
Make a list of tasks to take to achieve your objective.\n\n\
You also have multiple capabilities at your disposal, one JSON object per line:\n\
{capabilities}\n\n\
For each task, you may choose to use a capability or none at all. \
If you can achieve a task without a capability, you should do so. \
You may use a capability multiple times.\n\
Minimize the number of steps and capabilities used while maximizing the quality of the result.",
        memories = memory_section(memories),
    )
}

pub struct ActionPromptParts<'a> {
    pub objective: &'a str,
    pub plan: &'a str,
    pub memories: &'a [String],
    pub previous_output: Option<&'a str>,
    pub capabilities: &'a str,
    pub directive_schema: &'a str,
}

pub fn action_prompt(parts: &ActionPromptParts<'_>) -> String {
    let previous = parts.previous_output.unwrap_or(NO_PREVIOUS_OUTPUT);
    format!(
        "You are an intelligent agent that is given the following objective: {objective}.\n\
{memories}\n\n\
Previously, you came up with a plan to achieve this goal. Here is the plan:\n\
{plan}\n\n\
Previous tool output:\n\
{previous}\n\n\
The capabilities available to you are, one JSON object per line:\n\
{capabilities}\n\n\
Recall that your objective is {objective}. Continue working towards your objective.\n\
Output exactly one directive as a JSON object matching this schema:\n\
{schema}\n\n\
To use a capability:\n\
{{\"action\": \"<capability name>\", \"input\": {{\"<input name>\": \"<input value>\"}}}}\n\n\
If the objective is complete:\n\
{{\"action\": \"{complete}\", \"output\": \"<the final result for the user>\"}}",
        objective = parts.objective,
        memories = memory_section(parts.memories),
        plan = parts.plan,
        previous = previous,
        capabilities = parts.capabilities,
        schema = parts.directive_schema,
        complete = COMPLETE_ACTION,
    )
}

pub fn reflection_prompt(objective: &str, action: &str, input_json: &str, output: &str) -> String {
    format!(
        "You are an AI agent tasked with solving the following objective: {objective}.\n\n\
As part of your efforts to solve this objective, you recently took the following action: {action}.\n\
The input to your action was: {input_json}.\n\
The response output of this action was: {output}.\n\n\
Summarize the output of this action into a form that can help you achieve your objective in the future. \
Summarize the actual output itself, not just meta-information about it: if the date capability \
returned \"2020-01-01\", the summary must include that date. Only your summary will be kept."
    )
}

pub fn importance_prompt(objective: &str, content: &str) -> String {
    format!(
        "On a scale of 1 to 10, where 1 is completely useless and 10 is actually achieving the goal, \
rate the importance of the following piece of memory when it comes to achieving the following goal.\n\
Goal: {objective}\n\
Use the following format: FORMAT: <rating>\n\
Do not return anything other than the format.\n\n\
Rate this piece of memory:\n\
{content}"
    )
}

/// 按字符数截断（用于反思输入与不调用模型时的摘录）
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        format!("{}...", s.chars().take(max).collect::<String>())
    } else {
        s.to_string()
    }
}
