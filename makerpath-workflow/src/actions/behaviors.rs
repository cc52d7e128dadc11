//! Behavior implementations, one per family of step actions

use super::{
    ActionError, ActionResult, Affordance, StepActionTag, StepBehavior, StepContext, StepInput,
    StepOutcome, StepView, TransformRequest,
};
use crate::definition::WorkflowStep;
use crate::variables::{VariableIdentity, VariableWrite};
use serde_json::{json, Value};

/// Declare a behavior struct that only carries its tag
macro_rules! tagged_behavior {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        pub struct $name {
            tag: StepActionTag,
        }

        impl $name {
            /// Behavior resolved for `tag`
            pub fn new(tag: StepActionTag) -> Self {
                Self { tag }
            }
        }
    };
}

/// Implement [`StepBehavior::tag`] for a [`tagged_behavior!`] struct
macro_rules! impl_tag {
    () => {
        fn tag(&self) -> &StepActionTag {
            &self.tag
        }
    };
}

/// Which of a step's keys identify its variable
#[derive(Debug, Clone, Copy)]
enum Keying {
    /// `variable_index_number`, falling back to `variable_name`
    IndexFirst,
    /// `variable_name`, falling back to `variable_index_number`
    NameFirst,
    /// Every key the step declares, index first
    Both,
}

fn identities(step: &WorkflowStep, keying: Keying) -> Vec<VariableIdentity> {
    let index = step.index_identity();
    let name = step.name_identity();
    match keying {
        Keying::IndexFirst => index.or(name).into_iter().collect(),
        Keying::NameFirst => name.or(index).into_iter().collect(),
        Keying::Both => index.into_iter().chain(name).collect(),
    }
}

fn variable_write(
    step: &WorkflowStep,
    keying: Keying,
    value: Value,
    rag_source_id: Option<i64>,
) -> ActionResult<VariableWrite> {
    let identity = identities(step, keying).into_iter().next().ok_or_else(|| {
        ActionError::invalid(
            step,
            "step declares neither variable_index_number nor variable_name",
        )
    })?;

    Ok(VariableWrite {
        identity,
        variable_index: step.variable_index.unwrap_or_default(),
        variable_name: step
            .variable_name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| step.name.clone()),
        rag_source_id,
        value,
    })
}

/// Value carried by generated or typed input
fn produced_value(step: &WorkflowStep, input: StepInput) -> ActionResult<Value> {
    match input {
        StepInput::Generated(Value::Null) => Err(ActionError::invalid(step, "generated output is empty")),
        StepInput::Generated(value) => Ok(value),
        StepInput::Text(text) if text.trim().is_empty() => {
            Err(ActionError::invalid(step, "text is empty"))
        }
        StepInput::Text(text) => Ok(Value::String(text)),
        other => Err(ActionError::unsupported(step, &other)),
    }
}

tagged_behavior!(
    /// Picks files or a RAG source from the shared library
    SelectorBehavior
);

impl StepBehavior for SelectorBehavior {
    fn behavior_type(&self) -> &'static str {
        "selector"
    }

    impl_tag!();

    fn render(&self, ctx: &StepContext<'_>) -> StepView {
        let view = StepView::base(ctx, self.capabilities());
        match self.tag {
            StepActionTag::SelectRagSource => view.offer(Affordance::SelectRagSource),
            _ => view.offer(Affordance::SelectFiles { multiple: true }),
        }
    }

    fn owned_identities(&self, step: &WorkflowStep) -> Vec<VariableIdentity> {
        identities(step, Keying::IndexFirst)
    }

    fn interpret(&self, step: &WorkflowStep, input: StepInput) -> ActionResult<StepOutcome> {
        match (&self.tag, input) {
            (StepActionTag::SelectFiles, StepInput::Selection(items)) => {
                if items.is_empty() {
                    return Err(ActionError::invalid(step, "no files selected"));
                }
                let write = variable_write(step, Keying::IndexFirst, Value::Array(items), None)?;
                Ok(StepOutcome::write_and_complete(write))
            }
            (
                StepActionTag::SelectRagSource,
                StepInput::RagSource {
                    rag_source_id,
                    label,
                },
            ) => {
                let value = json!({ "ragSourceId": rag_source_id, "label": label });
                let write = variable_write(step, Keying::IndexFirst, value, Some(rag_source_id))?;
                Ok(StepOutcome::write_and_complete(write))
            }
            (_, other) => Err(ActionError::unsupported(step, &other)),
        }
    }
}

tagged_behavior!(
    /// Free text typed by the user
    TextInputBehavior
);

impl StepBehavior for TextInputBehavior {
    fn behavior_type(&self) -> &'static str {
        "text_input"
    }

    impl_tag!();

    fn render(&self, ctx: &StepContext<'_>) -> StepView {
        StepView::base(ctx, self.capabilities()).offer(Affordance::TextField {
            prompt: ctx.step.input_prompt.clone(),
        })
    }

    fn owned_identities(&self, step: &WorkflowStep) -> Vec<VariableIdentity> {
        identities(step, Keying::NameFirst)
    }

    fn interpret(&self, step: &WorkflowStep, input: StepInput) -> ActionResult<StepOutcome> {
        match input {
            StepInput::Text(_) => {
                let value = produced_value(step, input)?;
                let write = variable_write(step, Keying::NameFirst, value, None)?;
                Ok(StepOutcome::write_and_complete(write))
            }
            other => Err(ActionError::unsupported(step, &other)),
        }
    }
}

tagged_behavior!(
    /// Text or document produced by a model
    GeneratorBehavior
);

impl StepBehavior for GeneratorBehavior {
    fn behavior_type(&self) -> &'static str {
        "generator"
    }

    impl_tag!();

    fn render(&self, ctx: &StepContext<'_>) -> StepView {
        StepView::base(ctx, self.capabilities()).offer(Affordance::Generate {
            prompt: ctx.step.input_prompt.clone(),
            output_format: ctx.step.output_format.clone(),
        })
    }

    fn owned_identities(&self, step: &WorkflowStep) -> Vec<VariableIdentity> {
        identities(step, Keying::Both)
    }

    fn interpret(&self, step: &WorkflowStep, input: StepInput) -> ActionResult<StepOutcome> {
        let value = produced_value(step, input)?;
        let write = variable_write(step, Keying::Both, value, None)?;
        Ok(StepOutcome::write_and_complete(write))
    }
}

tagged_behavior!(
    /// Upload into the shared library
    UploaderBehavior
);

impl StepBehavior for UploaderBehavior {
    fn behavior_type(&self) -> &'static str {
        "uploader"
    }

    impl_tag!();

    fn render(&self, ctx: &StepContext<'_>) -> StepView {
        StepView::base(ctx, self.capabilities()).offer(Affordance::UploadFile {
            source_type: ctx.step.input_source_type.clone(),
        })
    }

    fn owned_identities(&self, step: &WorkflowStep) -> Vec<VariableIdentity> {
        identities(step, Keying::IndexFirst)
    }

    fn interpret(&self, step: &WorkflowStep, input: StepInput) -> ActionResult<StepOutcome> {
        match input {
            StepInput::Uploaded { file_id, name } => {
                let value = json!({ "fileId": file_id, "name": name });
                let write = variable_write(step, Keying::IndexFirst, value, None)?;
                Ok(StepOutcome::write_and_complete(write))
            }
            other => Err(ActionError::unsupported(step, &other)),
        }
    }
}

tagged_behavior!(
    /// Prompt rewritten by a model
    OptimizerBehavior
);

impl StepBehavior for OptimizerBehavior {
    fn behavior_type(&self) -> &'static str {
        "optimizer"
    }

    impl_tag!();

    fn render(&self, ctx: &StepContext<'_>) -> StepView {
        StepView::base(ctx, self.capabilities()).offer(Affordance::OptimizePrompt {
            prompt: ctx.step.input_prompt.clone(),
        })
    }

    fn owned_identities(&self, step: &WorkflowStep) -> Vec<VariableIdentity> {
        identities(step, Keying::Both)
    }

    fn interpret(&self, step: &WorkflowStep, input: StepInput) -> ActionResult<StepOutcome> {
        let value = produced_value(step, input)?;
        let write = variable_write(step, Keying::Both, value, None)?;
        Ok(StepOutcome::write_and_complete(write))
    }
}

tagged_behavior!(
    /// Stores a value as a path variable or library entry
    SaverBehavior
);

impl StepBehavior for SaverBehavior {
    fn behavior_type(&self) -> &'static str {
        "saver"
    }

    impl_tag!();

    fn render(&self, ctx: &StepContext<'_>) -> StepView {
        StepView::base(ctx, self.capabilities()).offer(Affordance::SaveToLibrary)
    }

    fn owned_identities(&self, step: &WorkflowStep) -> Vec<VariableIdentity> {
        identities(step, Keying::NameFirst)
    }

    fn interpret(&self, step: &WorkflowStep, input: StepInput) -> ActionResult<StepOutcome> {
        let value = produced_value(step, input)?;
        let write = variable_write(step, Keying::NameFirst, value, None)?;
        Ok(StepOutcome::write_and_complete(write))
    }
}

tagged_behavior!(
    /// Conversation with a model
    ChatBehavior
);

impl StepBehavior for ChatBehavior {
    fn behavior_type(&self) -> &'static str {
        "chat"
    }

    impl_tag!();

    fn render(&self, ctx: &StepContext<'_>) -> StepView {
        StepView::base(ctx, self.capabilities())
            .offer(Affordance::ChatPanel {
                prompt: ctx.step.input_prompt.clone(),
            })
            .offer(Affordance::MarkComplete)
    }

    fn owned_identities(&self, step: &WorkflowStep) -> Vec<VariableIdentity> {
        identities(step, Keying::Both)
    }

    fn interpret(&self, step: &WorkflowStep, input: StepInput) -> ActionResult<StepOutcome> {
        if input == StepInput::MarkComplete {
            return Ok(StepOutcome::complete_only());
        }
        let value = produced_value(step, input)?;
        let write = variable_write(step, Keying::Both, value, None)?;
        // Every message saves the transcript; only an explicit finish completes
        Ok(StepOutcome {
            writes: vec![write],
            transform: None,
            complete: false,
        })
    }
}

tagged_behavior!(
    /// Downloadable file produced by a model
    FileGeneratorBehavior
);

impl StepBehavior for FileGeneratorBehavior {
    fn behavior_type(&self) -> &'static str {
        "file_generator"
    }

    impl_tag!();

    fn render(&self, ctx: &StepContext<'_>) -> StepView {
        StepView::base(ctx, self.capabilities()).offer(Affordance::GenerateFile {
            output_format: ctx.step.output_format.clone(),
        })
    }

    fn owned_identities(&self, step: &WorkflowStep) -> Vec<VariableIdentity> {
        identities(step, Keying::Both)
    }

    fn interpret(&self, step: &WorkflowStep, input: StepInput) -> ActionResult<StepOutcome> {
        match input {
            StepInput::Generated(_) => {
                let value = produced_value(step, input)?;
                let write = variable_write(step, Keying::Both, value, None)?;
                Ok(StepOutcome::write_and_complete(write))
            }
            other => Err(ActionError::unsupported(step, &other)),
        }
    }
}

tagged_behavior!(
    /// Runs source through the external extraction transform
    TranslationExtractorBehavior
);

impl StepBehavior for TranslationExtractorBehavior {
    fn behavior_type(&self) -> &'static str {
        "translation_extractor"
    }

    impl_tag!();

    fn render(&self, ctx: &StepContext<'_>) -> StepView {
        StepView::base(ctx, self.capabilities()).offer(Affordance::ExtractTranslations {
            source_variable: ctx.step.input_file_variable.clone(),
        })
    }

    fn owned_identities(&self, step: &WorkflowStep) -> Vec<VariableIdentity> {
        identities(step, Keying::NameFirst)
    }

    fn interpret(&self, step: &WorkflowStep, input: StepInput) -> ActionResult<StepOutcome> {
        let source = produced_value(step, input)?;
        let write = variable_write(step, Keying::NameFirst, Value::Null, None)?;
        Ok(StepOutcome {
            writes: Vec::new(),
            transform: Some(TransformRequest {
                input: source,
                write,
            }),
            complete: true,
        })
    }
}

tagged_behavior!(
    /// Extracted strings translated by a model
    TranslationGeneratorBehavior
);

impl StepBehavior for TranslationGeneratorBehavior {
    fn behavior_type(&self) -> &'static str {
        "translation_generator"
    }

    impl_tag!();

    fn render(&self, ctx: &StepContext<'_>) -> StepView {
        StepView::base(ctx, self.capabilities()).offer(Affordance::GenerateTranslations)
    }

    fn owned_identities(&self, step: &WorkflowStep) -> Vec<VariableIdentity> {
        identities(step, Keying::NameFirst)
    }

    fn interpret(&self, step: &WorkflowStep, input: StepInput) -> ActionResult<StepOutcome> {
        match input {
            StepInput::Generated(_) => {
                let value = produced_value(step, input)?;
                let write = variable_write(step, Keying::NameFirst, value, None)?;
                Ok(StepOutcome::write_and_complete(write))
            }
            other => Err(ActionError::unsupported(step, &other)),
        }
    }
}

tagged_behavior!(
    /// Stores translations in the shared library
    TranslationSaverBehavior
);

impl StepBehavior for TranslationSaverBehavior {
    fn behavior_type(&self) -> &'static str {
        "translation_saver"
    }

    impl_tag!();

    fn render(&self, ctx: &StepContext<'_>) -> StepView {
        StepView::base(ctx, self.capabilities())
            .offer(Affordance::SaveTranslations)
            .offer(Affordance::MarkComplete)
    }

    fn owned_identities(&self, step: &WorkflowStep) -> Vec<VariableIdentity> {
        identities(step, Keying::NameFirst)
    }

    fn interpret(&self, step: &WorkflowStep, input: StepInput) -> ActionResult<StepOutcome> {
        if input == StepInput::MarkComplete {
            return Ok(StepOutcome::complete_only());
        }
        let value = produced_value(step, input)?;
        let write = variable_write(step, Keying::NameFirst, value, None)?;
        Ok(StepOutcome::write_and_complete(write))
    }
}

tagged_behavior!(
    /// Final export of the path result
    ExportBehavior
);

impl StepBehavior for ExportBehavior {
    fn behavior_type(&self) -> &'static str {
        "export"
    }

    impl_tag!();

    fn render(&self, ctx: &StepContext<'_>) -> StepView {
        StepView::base(ctx, self.capabilities())
            .offer(Affordance::Export {
                output_format: ctx.step.output_format.clone(),
            })
            .offer(Affordance::MarkComplete)
    }

    fn interpret(&self, step: &WorkflowStep, input: StepInput) -> ActionResult<StepOutcome> {
        match input {
            StepInput::MarkComplete => Ok(StepOutcome::complete_only()),
            other => Err(ActionError::unsupported(step, &other)),
        }
    }
}

tagged_behavior!(
    /// Fallback for tags without a dedicated behavior
    GenericBehavior
);

impl StepBehavior for GenericBehavior {
    fn behavior_type(&self) -> &'static str {
        "generic"
    }

    impl_tag!();

    fn render(&self, ctx: &StepContext<'_>) -> StepView {
        StepView::base(ctx, self.capabilities()).offer(Affordance::MarkComplete)
    }

    fn interpret(&self, step: &WorkflowStep, input: StepInput) -> ActionResult<StepOutcome> {
        match input {
            StepInput::MarkComplete => Ok(StepOutcome::complete_only()),
            other => Err(ActionError::unsupported(step, &other)),
        }
    }
}
