//! Prompt material: the innovation-process bootstrap, the default instruction
//! list and the follow-up instruction used in iteration mode.

use crate::conversation::Turn;
use crate::tools::ToolRegistry;

/// Instruction repeated after the first step in iteration mode.
pub const FOLLOW_UP_INSTRUCTION: &str = "execute the next step based on your processes and the previous outcome! Finish with suggesting a following next step. This needs to be different from your previous job to avoid getting stuck in a loop.";

/// Topic used when a client submits none.
pub const DEFAULT_TOPIC: &str = "next generation of tooth brushes";

const PROCESS_DIRECTIVES: &[&str] = &[
    "You are an AI specialized in innovation processes. Your task is to guide through the entire innovation process from research to concept creation.",
    "You are equipped with a search tool.",
    "You conclude every task by suggesting a next step. For this consider the following process.",
    "Start with 1.1 researching trends in the given field and format the results as a table. Then proceed with 1.2 researching products and competitors in the given field and format the results as a table. Finally, for this step, 1.3 research painpoints for each of the relevant products and format the results as a table. Use product reviews and Reddit for this research.",
    "Next, 2.1 evaluate the painpoints by impact. 2.2 for the top 5 painpoints, define a How Might We Statement.",
    "Then, 3.1 dive into ideation and suggest 10 ideas for each painpoint using ideation methods like SCAMPER, TRIZ, and analogy thinking. 3.2 Evaluate the ideas by potential and effort and format the results in a table.",
    "For the top idea, 4.1 create a persona. 4.2 Create a concept description mentioning the target group, value, and idea description. 4.3 Suggest a roadmap for next steps including advice on how to prototype and test the idea.",
    "Then, 5.1 generate a briefing for another AI system to generate a web application that prototypes the core functionality of the top idea. format the briefing as code",
    "Walk through this process step by step, first planning the action, then executing it, and always finish your answer by suggesting a next step!",
];

const BOOTSTRAP_HUMAN: &str = "You are my innovation expert. I will give you a topic and you will conduct the entire innovation process from user, trend and tech research to ideation and concept creation.";
const BOOTSTRAP_AGENT: &str = "Now provide your topic so I can dive into the research!";

/// System directives followed by the simulated opening dialogue.
pub fn bootstrap_turns() -> Vec<Turn> {
    let mut turns: Vec<Turn> = PROCESS_DIRECTIVES
        .iter()
        .map(|d| Turn::System((*d).to_string()))
        .collect();
    turns.push(Turn::Human(BOOTSTRAP_HUMAN.to_string()));
    turns.push(Turn::Agent(BOOTSTRAP_AGENT.to_string()));
    turns
}

/// Built-in instruction list. The topic is appended to the first entry.
pub fn default_instructions() -> Vec<String> {
    [
        "Research trends in the following field and format the results as a table:",
        "Research products and competitors in this field and format the results as a table.",
        "Research painpoints for each of the relevant products using product reviews and Reddit, and format the results as a table.",
        "Evaluate the painpoints by impact. For the top 5 painpoints, define a How Might We statement.",
        "Suggest 10 ideas for each of the top painpoints using ideation methods like SCAMPER, TRIZ and analogy thinking. Evaluate the ideas by potential and effort and format the results as a table.",
        "For the top idea, create a persona and a concept description mentioning the target group, value and idea description.",
        "Suggest a roadmap for next steps, including advice on how to prototype and test the idea.",
        "Generate a briefing for another AI system to build a web application that prototypes the core functionality of the top idea. Format the briefing as code.",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Agent-level system prompt listing the callable tools.
pub fn build_system_prompt(tools: &ToolRegistry) -> String {
    if tools.is_empty() {
        return "You are a helpful assistant.".to_string();
    }

    let tool_descriptions = tools
        .list_tools()
        .iter()
        .map(|t| format!("- **{}**: {}", t.name, t.description))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are a helpful assistant.

You have access to the following tools:
{tool_descriptions}

Use a tool whenever the task needs current or external information. Do not invent sources; cite the URLs returned by the search tool."#
    )
}
