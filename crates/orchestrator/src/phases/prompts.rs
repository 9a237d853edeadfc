use agentflow_core::Requirement;

pub struct PhasePrompts;

impl PhasePrompts {
    pub fn planning(requirement: &Requirement, context: Option<&str>, action_types: &[String]) -> String {
        let criteria = if requirement.acceptance_criteria.is_empty() {
            "- (none given)".to_string()
        } else {
            requirement
                .acceptance_criteria
                .iter()
                .map(|c| format!("- {c}"))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let context_section = context
            .map(|c| format!("\n## Workspace Context\n```json\n{c}\n```\n"))
            .unwrap_or_default();

        format!(
            r#"You are planning a development task. Break it into an ordered list of actions.

## Requirement
**Title:** {title}
**Description:** {description}

## Acceptance Criteria
{criteria}
{context_section}
## Available Action Types
{types}

## Required Output
Respond with a JSON array only. Each element:
```json
{{"id": "a1", "type": "write_file", "description": "...", "parameters": {{}}, "dependencies": []}}
```
Ids must be unique. Dependencies may only name ids of earlier actions."#,
            title = requirement.title,
            description = requirement.description,
            types = action_types.join(", "),
        )
    }

    pub fn review(requirement: &Requirement, actions_json: &str) -> String {
        format!(
            r#"Review the following execution plan before it runs.

## Requirement
**Title:** {title}
**Description:** {description}

## Plan
```json
{actions_json}
```

## Required Output
Write a short Markdown review, then end with a JSON block:
```json
{{"approved": true, "summary": "one sentence verdict"}}
```
Set "approved" to false if the plan is unsafe, incomplete or wrong."#,
            title = requirement.title,
            description = requirement.description,
        )
    }
}
