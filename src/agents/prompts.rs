use std::fmt::Write;

use crate::types::{Tender, TenderCategory};

/// Prompt library for the tender analysis agents
pub struct PromptLibrary;

fn join_categories(categories: &[TenderCategory]) -> String {
    if categories.is_empty() {
        "unspecified".to_string()
    } else {
        categories
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl PromptLibrary {
    pub fn filter_system() -> &'static str {
        "You are an expert procurement analyst specializing in technology tenders. \
        Be precise and conservative."
    }

    /// Relevance classification prompt with the fixed category vocabulary
    pub fn filter_prompt(tender: &Tender) -> String {
        format!(
            "Analyze this procurement tender:\n\n\
            TITLE: {title}\n\n\
            DESCRIPTION: {description}\n\n\
            ORGANIZATION: {organization}\n\n\
            CRITERIA FOR RELEVANCE:\n\
            A tender is relevant if it involves:\n\
            1. Cybersecurity (threat detection, pentesting, security audits, SIEM)\n\
            2. Artificial Intelligence/ML (AI solutions, automation, ML models)\n\
            3. Software Development (custom software, web/mobile apps, SaaS)\n\n\
            A tender is NOT relevant if it's only:\n\
            - Hardware procurement\n\
            - Physical infrastructure\n\
            - Non-technical services (facilities, catering, etc.)\n\n\
            Use only these category labels: {labels}.\n\
            Give a confidence between 0.0 and 1.0.\n\
            Analyze carefully and provide your assessment.",
            title = tender.title,
            description = tender.description,
            organization = tender.organization,
            labels = TenderCategory::labels().join(", "),
        )
    }

    pub fn rating_system() -> &'static str {
        "You are a business development expert evaluating tender opportunities. \
        Be analytical and realistic, not optimistic."
    }

    /// Six-dimension opportunity assessment prompt
    pub fn rating_prompt(tender: &Tender, categories: &[TenderCategory]) -> String {
        let expertise = join_categories(categories);
        format!(
            "Rate this tender opportunity for a small tech consultancy:\n\n\
            TENDER: {title}\n\
            CLIENT: {organization}\n\
            VALUE: {value}\n\
            DEADLINE: {deadline}\n\
            CATEGORIES: {expertise}\n\
            DESCRIPTION: {description}\n\n\
            Score each dimension independently on a 0-10 scale:\n\
            1. STRATEGIC FIT: How well does this match our expertise in {expertise}?\n\
            2. WIN PROBABILITY: Considering competition, requirements, and our capabilities\n\
            3. EFFORT REQUIRED: Complexity, timeline, resource needs\n\
            4. RISK LEVEL: Delivery, commercial and compliance risk\n\
            5. URGENCY: How soon a bid decision is needed\n\
            6. OVERALL SCORE: Overall attractiveness of the opportunity\n\n\
            Identify top 3 strengths and top 3 risks.\n\
            Give a Go/No-Go recommendation with reasoning.",
            title = tender.title,
            organization = tender.organization,
            value = tender.estimated_value.as_deref().unwrap_or("Not specified"),
            deadline = tender.deadline.as_deref().unwrap_or("Not specified"),
            description = tender.description,
        )
    }

    pub fn generator_system() -> &'static str {
        "You are an expert proposal writer with 15 years winning government contracts. \
        Write persuasively but authentically."
    }

    /// Bid document prompt, optionally preceded by reference examples
    pub fn generator_prompt(
        tender: &Tender,
        categories: &[TenderCategory],
        strengths: &[String],
        reference_material: Option<&str>,
    ) -> String {
        let mut prompt = String::new();

        if let Some(reference) = reference_material.filter(|r| !r.trim().is_empty()) {
            let _ = write!(
                prompt,
                "REFERENCE MATERIAL (successful past bids, for style and structure only; \
                do not copy facts from them):\n\n{reference}\n\n====\n\n"
            );
        }

        let _ = write!(
            prompt,
            "Create compelling bid document content for this tender:\n\n\
            TENDER: {title}\n\
            CLIENT: {organization}\n\
            OUR EXPERTISE: {expertise}\n\
            KEY STRENGTHS: {strengths}\n\
            REQUIREMENTS: {description}\n\n\
            Generate:\n\
            1. EXECUTIVE SUMMARY: 2-3 paragraphs highlighting our value proposition\n\
            2. TECHNICAL APPROACH: Our methodology and solution design\n\
            3. VALUE PROPOSITION: Why we're the best choice (unique differentiators)\n\
            4. TIMELINE ESTIMATE: Realistic project phases and milestones\n\n\
            Make it professional, specific to this tender, and compelling.\n\
            Use concrete language, avoid generic statements.",
            title = tender.title,
            organization = tender.organization,
            expertise = join_categories(categories),
            strengths = if strengths.is_empty() {
                "none listed".to_string()
            } else {
                strengths.join(", ")
            },
            description = tender.description,
        );

        prompt
    }

    /// Retrieval query synthesized from the tender
    pub fn retrieval_query(tender: &Tender, categories: &[TenderCategory]) -> String {
        format!(
            "{}\nOrganization: {}\nCategories: {}\n{}",
            tender.title,
            tender.organization,
            join_categories(categories),
            tender.description
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tender() -> Tender {
        Tender::new("T-1", "SOC services", "24/7 monitoring", "Port of Antwerp")
            .with_estimated_value("€1,200,000")
    }

    #[test]
    fn filter_prompt_lists_vocabulary() {
        let prompt = PromptLibrary::filter_prompt(&tender());
        assert!(prompt.contains("cybersecurity, ai, software, other"));
        assert!(prompt.contains("TITLE: SOC services"));
    }

    #[test]
    fn rating_prompt_fills_optional_fields() {
        let prompt = PromptLibrary::rating_prompt(&tender(), &[TenderCategory::Cybersecurity]);
        assert!(prompt.contains("VALUE: €1,200,000"));
        assert!(prompt.contains("DEADLINE: Not specified"));
        assert!(prompt.contains("expertise in cybersecurity"));
    }

    #[test]
    fn generator_prompt_prepends_reference_material() {
        let plain = PromptLibrary::generator_prompt(&tender(), &[], &[], None);
        assert!(plain.starts_with("Create compelling bid"));

        let augmented = PromptLibrary::generator_prompt(
            &tender(),
            &[],
            &["SIEM".into()],
            Some("### Example 1"),
        );
        assert!(augmented.starts_with("REFERENCE MATERIAL"));
        assert!(augmented.contains("### Example 1"));
        assert!(augmented.contains("KEY STRENGTHS: SIEM"));
    }

    #[test]
    fn retrieval_query_includes_categories() {
        let query = PromptLibrary::retrieval_query(&tender(), &[TenderCategory::Ai]);
        assert_eq!(
            query,
            "SOC services\nOrganization: Port of Antwerp\nCategories: ai\n24/7 monitoring"
        );
    }
}
