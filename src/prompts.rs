//! Prompt templates for the sampling and reasoning stages.

use crate::task::Attempt;

/// Prompt for one visually grounded sampling call over `frame_count` frames.
pub fn sampling_prompt(question: &str, frame_count: usize) -> String {
    format!(
        "You have {n} equally spaced frames (Frame 1 through Frame {n}) captured from a short dashcam video, \
taken from the driver's forward-facing perspective.

Using these frames, answer the following multiple-choice question by choosing the single best answer. \
Incorporate any relevant details observed in the frames (for example, lanes, signage, vehicles, pedestrians, \
traffic signals, road markings, obstructions) that might help in selecting the correct answer. Consider how \
details may change across the frames and note that some frames may be more crucial than others. Explain your \
reasoning in detail.

Steps to follow:
1. **Frame-by-Frame Analysis:** Describe the significant elements you notice in each of the {n} frames.
2. **Contextual Reasoning:** Integrate the observations from each frame. Think about what is happening over \
time, which elements are most relevant, and how they connect to the question.
3. **Match to Answer Choices:** Relate your findings to each of the options. Eliminate those that are \
inconsistent with the visual evidence or standard traffic rules.
4. **Provide the Best Answer:** Conclude with the single letter of the best choice in `<answer></answer>` tags.

Now, here is the question and its multiple-choice options:

{question}
",
        n = frame_count,
        question = question
    )
}

/// Prompt for the consensus reasoning call.
///
/// Attempts are reproduced verbatim under their original ordinal. The rubric
/// is identical for one attempt (critique or confirm) and for several
/// (aggregate); only the number of interpolated attempts changes.
pub fn reasoning_prompt(question: &str, attempts: &[Attempt]) -> String {
    let mut formatted = String::new();
    for attempt in attempts {
        formatted.push_str(&format!(
            "\nAttempt {}:\n{}\n",
            attempt.attempt_number,
            attempt.raw_text.as_deref().unwrap_or_default()
        ));
    }

    let received = match attempts.len() {
        1 => "one reasoning attempt".to_string(),
        n => format!("{} independent reasoning attempts", n),
    };

    format!(
        "Here is the multiple choice question that was posed:
{question}

I have received {received} from a vision model analyzing frames of the same dashcam video:
{formatted}
Evaluate every attempt against this rubric:
1. Completeness of observation: do the frame-by-frame observations capture all details relevant to the question?
2. Soundness of reasoning: is the contextual reasoning consistent with those observations and with traffic rules?
3. Correctness of final choice: does the chosen option follow from the observations and reasoning?

Then decide on the most accurate answer. You may confirm an existing answer or reach a different conclusion \
if the combined observations support it. Rely on concrete details mentioned in the attempts rather than \
assumptions about what the frames might contain.

Output the single letter of your chosen option in <answer></answer> tags, followed by a brief justification \
in <explanation></explanation> tags.
",
        question = question,
        received = received,
        formatted = formatted
    )
}
