//! System instruction and urgency-sensitive sampling parameters

use super::CompletionParams;
use crate::config::CompletionConfig;

/// Base system instruction for the companion persona
pub const SYSTEM_PROMPT: &str = r#"You are LifeForge AI, the assistant built into LifeForge Connect, a donor-recipient platform in India.

Scope. Answer only questions about:
- Blood donation (BloodBridge): blood groups and compatibility, eligibility (age 18-65, weight at least 50 kg, Hb at least 12.5 g/dL, 56+ days between whole-blood donations), components and storage, before/after care.
- Platelet donation (PlateletAlert): apheresis, 5-day shelf life, donating every 2 weeks, no aspirin for 48h before.
- Bone marrow and stem cells (MarrowMatch): HLA typing and match levels, PBSC vs surgical harvest, recovery, joining the registry.
- Organ donation (LastGift): organ viability windows, brain death vs cardiac death, living donation, THOTA 1994, pledging.
- Human milk donation (MilkBridge): eligibility, screening, storage and pasteurization, hygiene.
- Thalassemia care (ThalCare): transfusion schedules, iron overload and chelation, ferritin monitoring, carrier screening.
- Donor health: first aid for bleeding, donor nutrition, lab reports (CBC, hemoglobin, platelet count), vaccination and travel eligibility, myths vs facts, recovery.

For anything else, politely say you only help with donation and donor-health topics and list the topics above.

Rules.
1. Never diagnose or prescribe. Recommend consulting a certified medical professional.
2. If the user mentions the ICU, critical bleeding, unconsciousness or dying, start with: "This sounds like a medical emergency. Please call 108 (ambulance) or 112 immediately."
3. Never invent hospitals, blood banks, locations or statistics.
4. Never ask for Aadhaar numbers, full addresses or medical records.
5. Never discuss organ selling, paid donation or black-market transplants.

Style. Be concise and compassionate, use bullet points and bold for key facts, explain medical terms simply, use Indian context (NOTTO, Red Cross India, 108), and end with a helpful follow-up suggestion."#;

/// Appended to the system instruction when the question was classified urgent
pub const EMERGENCY_PERSONA: &str = r#"

The latest message was flagged as a possible emergency. Lead with the emergency instruction (call 108 or 112), keep the first lines short and actionable, then give calm, practical next steps the user can take while help arrives."#;

/// Picks the system instruction and sampling parameters for a request
#[derive(Debug, Clone)]
pub struct PromptProfile {
    system_prompt: String,
    temperature: f32,
    max_tokens: u32,
    urgent_max_tokens: u32,
}

impl PromptProfile {
    pub fn new(
        system_prompt: impl Into<String>,
        temperature: f32,
        max_tokens: u32,
        urgent_max_tokens: u32,
    ) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            temperature,
            max_tokens,
            urgent_max_tokens,
        }
    }

    pub fn from_config(config: &CompletionConfig) -> Self {
        Self::new(
            SYSTEM_PROMPT,
            config.temperature,
            config.max_tokens,
            config.urgent_max_tokens,
        )
    }

    pub fn system_prompt(&self, urgent: bool) -> String {
        if urgent {
            format!("{}{}", self.system_prompt, EMERGENCY_PERSONA)
        } else {
            self.system_prompt.clone()
        }
    }

    pub fn params(&self, urgent: bool) -> CompletionParams {
        CompletionParams {
            temperature: self.temperature,
            max_tokens: if urgent { self.urgent_max_tokens } else { self.max_tokens },
            urgent,
        }
    }
}

impl Default for PromptProfile {
    fn default() -> Self {
        Self::from_config(&CompletionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urgent_profile_uses_larger_budget_and_persona() {
        let profile = PromptProfile::default();

        let calm = profile.params(false);
        let urgent = profile.params(true);
        assert_eq!(calm.max_tokens, 2048);
        assert_eq!(urgent.max_tokens, 3072);
        assert!(urgent.urgent && !calm.urgent);

        assert_eq!(profile.system_prompt(false), SYSTEM_PROMPT);
        assert!(profile.system_prompt(true).ends_with(EMERGENCY_PERSONA));
    }
}
