//! # Prompt Builder
//! Pure, deterministic construction of the batch scoring prompt.
//! No I/O; suitable for unit tests and offline inspection.
//!
//! The instruction block is fixed. The policy and the sub-batch are
//! appended as pretty-printed JSON, so two calls with identical inputs
//! produce identical prompts.

use serde_json::Value;

use crate::models::ScoringPolicy;

/// System message sent with every model request.
pub const SYSTEM_MESSAGE: &str = "You are an AI assistant that returns STRICT JSON only.";

/// Fixed instruction block: field provenance, scoring rubric, location
/// rule and the strict output contract. Kept as one literal so the
/// builder stays trivially deterministic.
const BATCH_HEADER: &str = r#"You are a lead qualification assistant. Your task is to evaluate EACH prospect in the incoming list and return a JSON ARRAY of individual result objects, each containing a score from 0 to 100 and a brief justification.

The input includes a shared `scoring_settings` block and a list of `prospects`.

Within `scoring_settings`:
- The fields `company_description` and `exclusion_criteria` describe our own company (the seller). Use them only for understanding the product and filtering out irrelevant prospects.
- All other fields (`industries`, `employee_range`, `revenue_range`, `funding_stages`, `title_keywords`, `seniority_levels`, `buying_roles`, `locations`) define our Ideal Customer Profile (ICP) -- use them to evaluate each prospect.
- The optional `other_preferences` field contains additional soft guidelines (e.g., "prefer technical founders") that can influence scores and justifications, but ignore it if it doesn't apply.

THINKING LOGIC (what to consider)
1) First, check if the product generally makes sense for the company: proximity of industry to ICP, scale by headcount/revenue, and absence of hard stops (competitors/forbidden markets/industries). If there is a gross mismatch -> DISQUALIFIED and briefly state the reason.
2) COMPANY FIT: use explicit fields such as company_industry, company_size_range, revenue if present, and maturity signals (hiring/growth/stack).
3) PERSONA FIT: use the prospect's title and seniority to judge whether the person owns the problem or can strongly initiate adoption; is_decision_maker and management_level are key indicators.
4) TIMING/TRIGGERS: funding (stage/date/amount), active hiring in a relevant function, growth signals, recent role change.
Use ONLY explicit facts present in the input. Do NOT invent data. Missing fields -> treat as "Unknown" and do NOT penalize for missing data; only apply penalties if exclusion criteria or location rules are explicitly violated.

LOCATION RULE
- If the policy lists target locations and the prospect's country differs -> reduce the score noticeably.
- If the prospect's country is explicitly excluded in exclusion_criteria -> Disqualified (score=0).
- If location is missing -> no penalty.

SCORE INTERPRETATION
Once you've evaluated the fit, assign a score from 0 to 100 based on overall alignment:
- A (85-100): excellent fit -- strong alignment with ICP, multiple matching signals
- B (70-84): good fit -- solid match with a few missing signals
- C (31-69): partial or unclear fit -- some match, but weak/uncertain
- D (0-30): poor fit -- clear mismatch or explicit disqualification
The final score MUST be an integer 0..100 reflecting the specific strength of the match. If the prospect does not match our ICP and there is no reasonable scenario where our product could help them, assign a D score.

OUTPUT (STRICT JSON, ARRAY of result objects -- no extra text)
Return exactly a JSON array with one object per prospect, in the SAME ORDER as the input list:
[
  {
    "prospect_id": "<exactly the same value from the input JSON field prospect_id. If missing, return 'unknown'>",
    "score": <integer 0..100 -- final score for this individual>,
    "justification": "1-2 short English sentences citing explicit facts (industry/size/revenue/title/seniority/buying role/location/experience/timing), mentioning the letter grade in parentheses, and explaining the chosen score within the band."
  },
  ...
]

Scoring Settings (full JSON)
"#;

/// Build the batch prompt for one ordered sub-batch of prospects.
///
/// Pure function of its inputs; never touches the network.
pub fn build_batch_prompt(policy: &ScoringPolicy, prospects: &[Value]) -> String {
    let settings_block = serde_json::to_string_pretty(policy)
        .unwrap_or_else(|_| "{}".to_string());
    let prospects_block = serde_json::to_string_pretty(prospects)
        .unwrap_or_else(|_| "[]".to_string());

    let mut out = String::with_capacity(
        BATCH_HEADER.len() + settings_block.len() + prospects_block.len() + 32,
    );
    out.push_str(BATCH_HEADER);
    out.push_str(&settings_block);
    out.push_str("\n\nProspects (JSON array)\n");
    out.push_str(&prospects_block);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn policy() -> ScoringPolicy {
        ScoringPolicy {
            company_description: "We sell observability tooling.".into(),
            industries: vec!["SaaS".into(), "Fintech".into()],
            ..Default::default()
        }
    }

    #[test]
    fn prompt_is_deterministic() {
        let prospects = vec![json!({"prospect_id": "p-1", "position_title": "CTO"})];
        let a = build_batch_prompt(&policy(), &prospects);
        let b = build_batch_prompt(&policy(), &prospects);
        assert_eq!(a, b);
    }

    #[test]
    fn prompt_embeds_policy_and_prospects_in_order() {
        let prospects = vec![
            json!({"prospect_id": "first"}),
            json!({"prospect_id": "second"}),
        ];
        let p = build_batch_prompt(&policy(), &prospects);
        assert!(p.contains("observability tooling"));
        let i = p.find("\"first\"").expect("first prospect present");
        let j = p.find("\"second\"").expect("second prospect present");
        assert!(i < j, "prospect order must be preserved in the prompt");
    }

    #[test]
    fn prompt_states_rubric_and_output_contract() {
        let p = build_batch_prompt(&policy(), &[]);
        assert!(p.contains("A (85-100)"));
        assert!(p.contains("B (70-84)"));
        assert!(p.contains("C (31-69)"));
        assert!(p.contains("D (0-30)"));
        assert!(p.contains("SAME ORDER"));
        assert!(p.contains("Disqualified (score=0)"));
        assert!(p.contains("Do NOT invent data"));
    }
}
