//! Step action tags and their capability profiles

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Behavior tag carried by every step
///
/// The set is closed except for [`StepActionTag::Unknown`], which keeps the
/// raw tag of anything newer than this engine so it can be written back
/// unchanged and rendered through the generic behavior.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StepActionTag {
    /// Pick files from the shared library
    SelectFiles,
    /// Pick a RAG source
    SelectRagSource,
    /// Free text entered by the user
    TextInput,
    /// Generate text with a model
    GenerateText,
    /// Generate a longer document with a model
    GenerateDocument,
    /// Upload a file into the shared library
    UploadFile,
    /// Rewrite a prompt with a model
    OptimizePrompt,
    /// Save a value as a path variable
    SaveVariable,
    /// Save a generated output into the shared library
    SaveOutput,
    /// Chat with a model
    Chat,
    /// Generate a downloadable file with a model
    GenerateFile,
    /// Extract translatable strings from source
    TranslationExtract,
    /// Translate extracted strings with a model
    TranslationGenerate,
    /// Store translations in the shared library
    TranslationSave,
    /// Have a model review a previous output
    ReviewOutput,
    /// Export the path result through a template
    ExportTemplate,
    /// Any tag this engine does not know
    Unknown(String),
}

impl StepActionTag {
    /// Every known tag, in declaration order
    pub const KNOWN: [StepActionTag; 16] = [
        StepActionTag::SelectFiles,
        StepActionTag::SelectRagSource,
        StepActionTag::TextInput,
        StepActionTag::GenerateText,
        StepActionTag::GenerateDocument,
        StepActionTag::UploadFile,
        StepActionTag::OptimizePrompt,
        StepActionTag::SaveVariable,
        StepActionTag::SaveOutput,
        StepActionTag::Chat,
        StepActionTag::GenerateFile,
        StepActionTag::TranslationExtract,
        StepActionTag::TranslationGenerate,
        StepActionTag::TranslationSave,
        StepActionTag::ReviewOutput,
        StepActionTag::ExportTemplate,
    ];

    /// Read a tag from its wire name, accepting legacy aliases
    ///
    /// Never fails: unrecognized names become [`StepActionTag::Unknown`].
    pub fn from_wire(raw: &str) -> Self {
        match raw.trim() {
            "select_files" | "file_selector" => StepActionTag::SelectFiles,
            "select_rag_source" => StepActionTag::SelectRagSource,
            "text_input" => StepActionTag::TextInput,
            "generate_text" | "ai_generate" => StepActionTag::GenerateText,
            "generate_document" => StepActionTag::GenerateDocument,
            "upload_file" | "upload" => StepActionTag::UploadFile,
            "optimize_prompt" => StepActionTag::OptimizePrompt,
            "save_variable" | "save" => StepActionTag::SaveVariable,
            "save_output" => StepActionTag::SaveOutput,
            "chat" => StepActionTag::Chat,
            "generate_file" => StepActionTag::GenerateFile,
            "translation_extract" | "extract_translations" => StepActionTag::TranslationExtract,
            "translation_generate" | "translate" => StepActionTag::TranslationGenerate,
            "translation_save" => StepActionTag::TranslationSave,
            "review_output" => StepActionTag::ReviewOutput,
            "export_template" => StepActionTag::ExportTemplate,
            _ => StepActionTag::Unknown(raw.to_string()),
        }
    }

    /// Canonical wire name; unknown tags return their raw text
    pub fn as_str(&self) -> &str {
        match self {
            StepActionTag::SelectFiles => "select_files",
            StepActionTag::SelectRagSource => "select_rag_source",
            StepActionTag::TextInput => "text_input",
            StepActionTag::GenerateText => "generate_text",
            StepActionTag::GenerateDocument => "generate_document",
            StepActionTag::UploadFile => "upload_file",
            StepActionTag::OptimizePrompt => "optimize_prompt",
            StepActionTag::SaveVariable => "save_variable",
            StepActionTag::SaveOutput => "save_output",
            StepActionTag::Chat => "chat",
            StepActionTag::GenerateFile => "generate_file",
            StepActionTag::TranslationExtract => "translation_extract",
            StepActionTag::TranslationGenerate => "translation_generate",
            StepActionTag::TranslationSave => "translation_save",
            StepActionTag::ReviewOutput => "review_output",
            StepActionTag::ExportTemplate => "export_template",
            StepActionTag::Unknown(raw) => raw,
        }
    }

    /// Whether this is [`StepActionTag::Unknown`]
    pub fn is_unknown(&self) -> bool {
        matches!(self, StepActionTag::Unknown(_))
    }

    /// Whether the step calls an external AI provider and needs a credential
    pub fn needs_external_credential(&self) -> bool {
        match self {
            StepActionTag::GenerateText
            | StepActionTag::GenerateDocument
            | StepActionTag::OptimizePrompt
            | StepActionTag::Chat
            | StepActionTag::GenerateFile
            | StepActionTag::TranslationGenerate
            | StepActionTag::ReviewOutput => true,
            StepActionTag::SelectFiles
            | StepActionTag::SelectRagSource
            | StepActionTag::TextInput
            | StepActionTag::UploadFile
            | StepActionTag::SaveVariable
            | StepActionTag::SaveOutput
            | StepActionTag::TranslationExtract
            | StepActionTag::TranslationSave
            | StepActionTag::ExportTemplate
            | StepActionTag::Unknown(_) => false,
        }
    }

    /// Whether the step reads from or writes to the shared file library
    pub fn uses_shared_library(&self) -> bool {
        match self {
            StepActionTag::SelectFiles
            | StepActionTag::SelectRagSource
            | StepActionTag::UploadFile
            | StepActionTag::SaveVariable
            | StepActionTag::SaveOutput
            | StepActionTag::TranslationSave => true,
            StepActionTag::TextInput
            | StepActionTag::GenerateText
            | StepActionTag::GenerateDocument
            | StepActionTag::OptimizePrompt
            | StepActionTag::Chat
            | StepActionTag::GenerateFile
            | StepActionTag::TranslationExtract
            | StepActionTag::TranslationGenerate
            | StepActionTag::ReviewOutput
            | StepActionTag::ExportTemplate
            | StepActionTag::Unknown(_) => false,
        }
    }

    /// Both predicates together
    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            needs_external_credential: self.needs_external_credential(),
            uses_shared_library: self.uses_shared_library(),
        }
    }
}

impl std::fmt::Display for StepActionTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for StepActionTag {
    fn from(raw: &str) -> Self {
        Self::from_wire(raw)
    }
}

impl Serialize for StepActionTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for StepActionTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from_wire(&raw))
    }
}

/// Capability profile of a step kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    /// The step needs an AI provider credential
    pub needs_external_credential: bool,
    /// The step touches the shared file library
    pub uses_shared_library: bool,
}
