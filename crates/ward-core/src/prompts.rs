// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! System-prompt composition.
//!
//! Each agent role gets `base + model_specific + vision_addon`: the base
//! carries the semantics, the model-specific block only tightens or loosens
//! *formatting* according to the capability record, and the vision addon is
//! appended when the query mentions imaging.

use chrono::Local;

use ward_model::{ModelCapability, ToolStrategy};

/// The roles the agent talks to the model in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptRole {
    Plan,
    Act,
    TaskDone,
    GoalDone,
    OptimizeArgs,
    Answer,
}

/// Keywords that put a query on the imaging path.
const IMAGING_KEYWORDS: &[&str] = &[
    "dicom",
    "image",
    "imaging",
    "mri",
    "ct scan",
    "ct-scan",
    "x-ray",
    "xray",
    "scan",
    "radiology",
    "visualize",
    "ecg waveform",
    "ecg tracing",
    "view image",
    "analyze image",
    "imaging finding",
];

/// Does the query ask for visual analysis?  Drives the vision addon and
/// planning guidance.
pub fn query_mentions_imaging(query: &str) -> bool {
    let lower = query.to_lowercase();
    IMAGING_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Compose the system prompt for `role`.  `tool_catalogue` is the expanded
/// tool description block (names, arguments, markers) and is embedded where
/// the role needs it.
pub fn system_prompt(
    role: PromptRole,
    capability: &ModelCapability,
    has_images: bool,
    tool_catalogue: &str,
) -> String {
    let mut prompt = base_prompt(role, tool_catalogue);
    prompt.push_str(model_specific_block(role, capability));
    if has_images {
        prompt.push_str(vision_addon(role));
    }
    prompt
}

fn base_prompt(role: PromptRole, tool_catalogue: &str) -> String {
    match role {
        PromptRole::Plan => format!(
            "You are the planning component of Ward, a clinical case analysis agent. \
             Break the user's clinical query into a clear sequence of actionable tasks.\n\n\
             Available tools:\n---\n{tool_catalogue}\n---\n\n\
             Task planning guidelines:\n\
             1. Each task must be SPECIFIC and ATOMIC: one data retrieval or analysis step\n\
             2. Tasks are SEQUENTIAL: later tasks can build on earlier results\n\
             3. Include all necessary context in each task description (patient id, category, filters)\n\
             4. Phrase tasks so they map onto the available tools\n\n\
             Know when tools do not exist: there is NO dedicated tool for allergies, \
             procedures, immunizations or care plans; plan those tasks around \
             search_patient_resources or run_analysis_program. analyze_batch_conditions \
             takes a SINGLE condition filter with no AND/OR logic; compound condition \
             queries belong in run_analysis_program.\n\n\
             Population-level queries are ONE task: batch tools fetch patients internally, \
             so do not plan a separate \"list patients\" step unless the query only asks \
             for patient ids.\n\n\
             Imaging tasks use a two-step discovery pattern: first explore the DICOM \
             metadata actually present (run_analysis_program with dicom_scan and \
             dicom_metadata), then analyze with the discovered values. The corpus tags \
             every file Modality=OT, so never filter on textbook modality codes.\n\n\
             If the query is not related to clinical case analysis or cannot be addressed \
             with the available tools, return an EMPTY task list; the system will answer \
             directly without tools.\n\n\
             Your output must be a JSON object with a 'tasks' field.\n"
        ),
        PromptRole::Act => (
            "You are the execution component of Ward, a clinical case analysis agent. \
             Select the single most appropriate tool call to advance the current task.\n\n\
             Decision process:\n\
             1. Read the task and identify the SPECIFIC clinical data requested\n\
             2. Review previous tool outputs and identify what you already have\n\
             3. If the outputs already cover the task, select no tool\n\
             4. Otherwise select the ONE tool that provides the missing data, using every \
             relevant filtering parameter\n\n\
             Use run_analysis_program when any of these hold:\n\
             - the resource type has no dedicated tool (allergies, procedures, immunizations)\n\
             - the task needs AND/OR logic over conditions\n\
             - the task cross-references multiple data sources (diagnosis AND imaging/labs)\n\
             - the task explicitly asks for visual analysis of images\n\n\
             Do not call list_patients before a batch tool; batch tools fetch patients \
             internally. Avoid repeating a call with identical arguments. If a previous \
             output already contains image_b64 data, the next step is \
             analyze_medical_images, not another load.\n\n\
             If results come back empty, do not immediately give up: broaden the filter, \
             or explore the data's actual structure with run_analysis_program before \
             concluding the data does not exist.\n"
        )
        .to_string(),
        PromptRole::TaskDone => "You are a validation agent for clinical case analysis. \
             Decide whether the task is complete based on the outputs provided.\n\n\
             A task is complete when the requested data was retrieved and suffices for the \
             task objective, or when it is clear after an exploration attempt that the data \
             is not in the corpus.\n\n\
             A task is NOT complete when a search returned zero results on the first \
             attempt with no exploration of the data's structure, or when the outputs \
             contradict what the corpus is known to contain.\n\n\
             Respond with a JSON object: {\"done\": true} or {\"done\": false}.\n"
            .to_string(),
        PromptRole::GoalDone => "You are a meta-validation agent for clinical case analysis. \
             Decide whether the original clinical query has been sufficiently answered.\n\n\
             Primary check: have ALL planned tasks been completed? If any planned task is \
             not completed, respond {\"done\": false}.\n\
             Secondary check (only when all tasks are complete): are the key clinical data \
             points present, with enough context to be clinically useful?\n\n\
             Respond with a JSON object: {\"done\": true} or {\"done\": false}.\n"
            .to_string(),
        PromptRole::OptimizeArgs => format!(
            "You are the argument optimization component of Ward, a clinical case \
             analysis agent. Review a proposed tool call and return the optimal arguments.\n\n\
             Current date: {date}\n\n\
             Ensure every relevant parameter is used: filtering parameters when the task \
             names a specific data subset, category parameters for labs vs vitals, limits \
             sized to how much data the task needs, and date windows computed relative to \
             the current date. Only use parameters that exist in the tool's schema.\n\n\
             Respond with a JSON object: {{\"arguments\": {{ ... }}}}.\n",
            date = current_date()
        ),
        PromptRole::Answer => format!(
            "You are the answer generation component of Ward, a clinical case analysis \
             agent. Synthesize the collected clinical data into a clear, actionable answer.\n\n\
             Current date: {date}\n\n\
             If clinical data was collected, the answer MUST:\n\
             1. Lead with the key clinical finding in the first sentence\n\
             2. Include specific values with units, reference ranges and dates\n\
             3. Organize findings by clinical system or relevance\n\
             4. Highlight critical or abnormal values prominently\n\
             5. Note data gaps that limit the analysis\n\n\
             Structure (complete every applicable section): demographics; primary \
             conditions; allergies (or state \"No known allergies\"); active medications \
             with dosages; recent labs and vitals; imaging findings when present; and \
             ALWAYS end with a Clinical Implications section covering what the findings \
             mean, medication interactions, monitoring recommendations, and red flags \
             needing immediate attention.\n\n\
             Use plain text only, no markdown markup. Do not provide definitive \
             diagnoses; present data to support clinical reasoning. Flag critical values \
             immediately (e.g. K+ > 6.0, troponin elevation).\n\n\
             If NO clinical data was collected, answer from general medical knowledge and \
             add: \"Note: I specialize in clinical case analysis using patient data. For \
             this general question, I've provided information based on clinical \
             knowledge.\"\n\n\
             Respond with a JSON object: {{\"answer\": \"...\"}}.\n",
            date = current_date()
        ),
    }
}

/// Formatting directives only; semantics never change per model.
fn model_specific_block(role: PromptRole, capability: &ModelCapability) -> &'static str {
    match capability.tool_strategy {
        ToolStrategy::Native => "",
        ToolStrategy::PromptJson => match role {
            // The act role gets its protocol block appended by the gateway;
            // the structured roles need the reminder here.
            PromptRole::Act => "",
            _ => "\nIMPORTANT: Output ONLY a single valid JSON object in the requested \
                  shape. No prose before or after it, no markdown fences.\n",
        },
    }
}

fn vision_addon(role: PromptRole) -> &'static str {
    match role {
        PromptRole::Plan => "\nThis query involves imaging. Plan the mandatory two-task \
             pattern: first a metadata discovery task over the DICOM corpus, then an \
             analysis task that uses the discovered values with the vision primitives \
             (load_dicom, load_ecg, analyze_image, ecg_rhythm).\n",
        PromptRole::Act => "\nThis query involves imaging. Prefer run_analysis_program \
             with the vision steps (load_dicom, load_ecg, analyze_image, ecg_rhythm); \
             discover the DICOM metadata structure before filtering on it.\n",
        PromptRole::Answer => "\nInclude an imaging findings section describing what the \
             vision analysis showed, with the model's stated confidence.\n",
        _ => "",
    }
}

fn current_date() -> String {
    Local::now().format("%A, %B %d, %Y").to_string()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
