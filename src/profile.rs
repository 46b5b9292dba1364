use std::path::Path;

use serde::Deserialize;

use crate::config::{Config, ProfileConfig};
use crate::error::{Result, VivaError};

const SAMPLE_PROFILE: &str = include_str!("../profile.example.yaml");

#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    pub name: String,
    pub title: String,
    #[serde(default)]
    pub contact: Contact,
    pub summary: String,
    #[serde(default)]
    pub skills: Vec<SkillGroup>,
    #[serde(default)]
    pub experience: Vec<Experience>,
    #[serde(default)]
    pub education: Vec<Education>,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub certificates: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Contact {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub linkedin: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SkillGroup {
    pub category: String,
    pub items: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Experience {
    pub role: String,
    pub company: String,
    pub period: String,
    pub location: String,
    #[serde(default)]
    pub points: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Education {
    pub degree: String,
    pub institution: String,
    pub year: String,
    #[serde(default)]
    pub location: String,
}

impl Profile {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            VivaError::Profile(format!("failed to read profile {}: {e}", path.display()))
        })?;
        Self::parse(&contents)
            .map_err(|e| VivaError::Profile(format!("{}: {e}", path.display())))
    }

    pub fn parse(yaml: &str) -> Result<Self> {
        let profile: Self = serde_yaml_ng::from_str(yaml)
            .map_err(|e| VivaError::Profile(format!("failed to parse profile: {e}")))?;
        if profile.name.trim().is_empty() {
            return Err(VivaError::Profile("profile name is empty".to_string()));
        }
        Ok(profile)
    }

    /// The bundled example profile.
    pub fn sample() -> Result<Self> {
        Self::parse(SAMPLE_PROFILE)
    }

    /// The configured profile, or the bundled sample when none is set.
    pub fn from_config(config: &ProfileConfig) -> Result<Self> {
        match config.path.as_deref() {
            Some(path) => Self::load(&Config::expand_path(path)),
            None => Self::sample(),
        }
    }
}

/// First-person persona script sent as the session's system instruction.
#[must_use]
pub fn system_instruction(profile: &Profile, config: &ProfileConfig) -> String {
    let mut lines = vec![
        format!("You are {}, a {}.", profile.name, profile.title),
        "You are currently talking to a recruiter or a professional contact visiting your profile."
            .to_string(),
        format!(
            "Your goal is to showcase your experience as a {} and answer questions about your background.",
            profile.title
        ),
        "Speak in the first person (\"I\").".to_string(),
        "Use a professional, enthusiastic, and confident tone.".to_string(),
        String::new(),
        "Here is your profile data to reference:".to_string(),
        String::new(),
        format!("Summary: {}", profile.summary.trim()),
    ];

    if !profile.skills.is_empty() {
        lines.push(String::new());
        lines.push("Key Skills:".to_string());
        lines.extend(
            profile
                .skills
                .iter()
                .map(|s| format!("- {}: {}", s.category, s.items)),
        );
    }

    if !profile.experience.is_empty() {
        lines.push(String::new());
        lines.push("Experience:".to_string());
        for e in &profile.experience {
            lines.push(format!(
                "- {} at {} ({}, {})",
                e.role, e.company, e.period, e.location
            ));
            if !e.points.is_empty() {
                lines.push(format!("  Key achievements: {}", e.points.join("; ")));
            }
        }
    }

    if !profile.education.is_empty() {
        lines.push(String::new());
        lines.push("Education:".to_string());
        lines.extend(
            profile
                .education
                .iter()
                .map(|e| format!("- {} from {} ({})", e.degree, e.institution, e.year)),
        );
    }

    if !profile.languages.is_empty() {
        lines.push(String::new());
        lines.push(format!("Languages: {}", profile.languages.join(", ")));
    }

    if !profile.certificates.is_empty() {
        lines.push(format!("Certificates: {}", profile.certificates.join(", ")));
    }

    lines.push(String::new());
    if let Some(situation) = config.situation.as_deref() {
        lines.push(format!("Current Situation: {}", situation.trim()));
    }
    if let Some(hint) = config.contact_hint.as_deref() {
        lines.push(hint.trim().to_string());
    } else if let Some(email) = profile.contact.email.as_deref() {
        lines.push(format!(
            "If asked about contact info, mention you can be reached at {email}."
        ));
    }

    lines.push(String::new());
    lines.push("When answering:".to_string());
    lines.push(
        "- Keep responses concise (under 30 seconds of speech) unless asked for details."
            .to_string(),
    );
    lines.push("- Mention specific tools and skills from your profile when relevant.".to_string());
    lines.push("- Tie your technical skills back to the results they produced.".to_string());

    lines.join("\n")
}
