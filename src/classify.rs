use regex::{Regex, RegexBuilder};
use std::collections::HashSet;

/// A permission category an automated agent can be granted from comment
/// text. Closed set: each variant carries its match patterns, the tools it
/// unlocks, and the capabilities it pulls in with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    PrCreation,
    BranchWrite,
    TestRun,
    LintRun,
    LabelEdit,
    IssueCreate,
    WorkflowDispatch,
}

impl Capability {
    pub const ALL: [Capability; 7] = [
        Capability::PrCreation,
        Capability::BranchWrite,
        Capability::TestRun,
        Capability::LintRun,
        Capability::LabelEdit,
        Capability::IssueCreate,
        Capability::WorkflowDispatch,
    ];

    /// Key emitted to the structured output sink.
    pub fn key(self) -> &'static str {
        match self {
            Capability::PrCreation => "pr_creation",
            Capability::BranchWrite => "branch_write",
            Capability::TestRun => "test_run",
            Capability::LintRun => "lint_run",
            Capability::LabelEdit => "label_edit",
            Capability::IssueCreate => "issue_create",
            Capability::WorkflowDispatch => "workflow_dispatch",
        }
    }

    /// Pattern alternatives; the flag is granted if any of them occurs
    /// anywhere in the text (case-insensitive, unanchored).
    fn alternatives(self) -> &'static [&'static str] {
        match self {
            Capability::PrCreation => &[
                r"create\s+(?:a\s+|the\s+)?(?:pull\s+request|pr)\b",
                r"open\s+(?:a\s+|the\s+)?(?:pull\s+request|pr)\b",
                r"\b(?:pull\s+request|pr)\s+creat(?:e|ion)\b",
            ],
            Capability::BranchWrite => &[
                r"push\s+(?:to\s+)?(?:a\s+|the\s+)?(?:new\s+)?branch\b",
                r"commit\s+(?:your\s+|the\s+)?changes?\b",
            ],
            Capability::TestRun => &[
                r"run\s+(?:the\s+)?tests?\b",
                r"execute\s+(?:the\s+)?test\s+suite\b",
            ],
            Capability::LintRun => &[
                r"run\s+(?:the\s+)?lint(?:er|ing)?\b",
                r"fix\s+(?:the\s+)?lint\b",
                r"format\s+(?:the\s+)?code\b",
            ],
            Capability::LabelEdit => &[
                r"(?:add|remove|apply|set|update)\s+(?:\S+\s+){0,3}labels?\b",
                r"label\s+(?:this|the)\s+(?:issue|pull\s+request|pr)\b",
            ],
            Capability::IssueCreate => &[
                r"(?:create|open|file)\s+(?:a\s+|the\s+)?(?:new\s+)?(?:follow-?up\s+)?issue\b",
                r"\bissue\s+creat(?:e|ion)\b",
            ],
            Capability::WorkflowDispatch => &[
                r"(?:run|trigger|dispatch)\s+(?:the\s+)?workflow\b",
                r"\bworkflow\s+dispatch\b",
            ],
        }
    }

    /// Tool identifiers this capability unlocks, in grant order.
    pub fn tools(self) -> &'static [&'static str] {
        match self {
            Capability::PrCreation => &["pr_create", "pr_comment"],
            Capability::BranchWrite => &["file_edit", "file_write", "branch_create", "git_push"],
            Capability::TestRun => &["bash_test"],
            Capability::LintRun => &["bash_lint", "file_edit"],
            Capability::LabelEdit => &["label_add", "label_remove"],
            Capability::IssueCreate => &["issue_create"],
            Capability::WorkflowDispatch => &["workflow_dispatch"],
        }
    }

    /// Capabilities whose tools are folded into this one's expansion even
    /// when they were not requested themselves: a PR cannot be created
    /// without somewhere to write it.
    pub fn implies(self) -> &'static [Capability] {
        match self {
            Capability::PrCreation => &[Capability::BranchWrite],
            _ => &[],
        }
    }

    fn matches(self, text: &str) -> bool {
        self.alternatives().iter().any(|pattern| {
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .expect("valid regex")
                .is_match(text)
        })
    }
}

/// Result of classifying one comment body. `proceed` is the mention gate:
/// when false no capability was evaluated and none is granted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub proceed: bool,
    granted: Vec<Capability>,
}

impl Classification {
    pub fn is_granted(&self, capability: Capability) -> bool {
        self.granted.contains(&capability)
    }

    pub fn granted(&self) -> &[Capability] {
        &self.granted
    }
}

/// Pure function of (text, handle). Capability rules are independent and
/// non-exclusive; a single comment may grant several at once. Evaluation
/// order does not affect the result.
pub fn classify(text: &str, handle: &str) -> Classification {
    if !mention_regex(handle).is_match(text) {
        return Classification {
            proceed: false,
            granted: Vec::new(),
        };
    }

    let granted = Capability::ALL
        .into_iter()
        .filter(|capability| capability.matches(text))
        .collect();

    Classification {
        proceed: true,
        granted,
    }
}

fn mention_regex(handle: &str) -> Regex {
    let pattern = format!(r"(?:^|[^\w/])@{}\b", regex::escape(handle));
    RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .build()
        .expect("valid regex")
}

/// Expand granted capabilities into a tool allow-list: base tools first,
/// then each granted capability's tools plus its implied capabilities'
/// tools, deduplicated in first-seen order.
pub fn build_tool_list(classification: &Classification, base_tools: &[String]) -> Vec<String> {
    fn push(tool: &str, seen: &mut HashSet<String>, tools: &mut Vec<String>) {
        if seen.insert(tool.to_string()) {
            tools.push(tool.to_string());
        }
    }

    let mut seen = HashSet::new();
    let mut tools = Vec::new();

    for tool in base_tools {
        push(tool, &mut seen, &mut tools);
    }

    for capability in Capability::ALL {
        if !classification.is_granted(capability) {
            continue;
        }
        for tool in capability.tools() {
            push(tool, &mut seen, &mut tools);
        }
        for implied in capability.implies() {
            for tool in implied.tools() {
                push(tool, &mut seen, &mut tools);
            }
        }
    }

    tools
}
