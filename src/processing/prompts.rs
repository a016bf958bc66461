//! Prompt templates sent to the generative model.

/// Instruction paired with every page image.
pub const PAGE_TEXT_PROMPT: &str = "Extract all visible text from this document image.";

/// Body substituted for a page the model returned nothing for.
pub const EMPTY_PAGE_NOTICE: &str = "Warning: Model returned no content.";

const CLAIM_SCHEMA: &str = r#"{
      "patient": {"name": "string", "age": "integer or null", "Insurance Scheme Service Provider": "string or null"},
      "diagnoses": ["list of strings"],
      "medications": [{"name": "string", "dosage": "string or null", "quantity": "string or null"}],
      "procedures": ["list of strings"],
      "admission": {"was_admitted": "boolean", "admission_date": "string in YYYY-MM-DD format or null", "discharge_date": "string in YYYY-MM-DD format or null"},
      "total_amount": "string"
    }"#;

/// Append one page block to the running document text.
pub fn append_page(document: &mut String, page_number: usize, text: &str) {
    document.push_str(&format!("\n\n--- Page {page_number} ---\n\n{text}"));
}

/// Prompt turning page-delimited claim text into `{data, extraction_confidence}`.
pub fn structuring_prompt(document_text: &str) -> String {
    format!(
        r#"Based on the following medical claim text, extract the key details. Then return a single, clean, valid JSON object with two top-level keys: "data" and "extraction_confidence".

1. "data" must contain the structured information matching this schema:
    {CLAIM_SCHEMA}
2. "extraction_confidence" must be your estimated confidence, a number from 0 to 100, that the extracted data is accurate and complete based on the source text.

Return only the raw JSON object. Do not include explanatory text or Markdown formatting such as ```json.

Text to analyze:
---
{document_text}
---
"#
    )
}

/// Prompt answering `question` from the pretty-printed claim data only.
pub fn answer_prompt(question: &str, data_json: &str) -> String {
    format!(
        r#"You are an assistant for a medical claims processor. Answer the question based ONLY on the provided JSON data.

Return your response as a single, clean JSON object with two keys:
1. "answer": a string containing your concise answer.
2. "answer_confidence": a number from 0 to 100 representing how certain you are that the answer is fully supported by the provided data.

Return only the raw JSON object, without Markdown formatting.

JSON Data:
{data_json}

Question: {question}
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_are_labelled_in_order() {
        let mut document = String::new();
        append_page(&mut document, 1, "Patient: Jane Doe");
        append_page(&mut document, 2, "Total: $120");

        assert_eq!(
            document,
            "\n\n--- Page 1 ---\n\nPatient: Jane Doe\n\n--- Page 2 ---\n\nTotal: $120"
        );
    }

    #[test]
    fn structuring_prompt_embeds_schema_and_text() {
        let prompt = structuring_prompt("--- Page 1 ---\nTotal: $120");
        assert!(prompt.contains("\"extraction_confidence\""));
        assert!(prompt.contains("Insurance Scheme Service Provider"));
        assert!(prompt.contains("---\n--- Page 1 ---\nTotal: $120\n---"));
    }

    #[test]
    fn answer_prompt_carries_question_and_context() {
        let prompt = answer_prompt("What is the total?", "{\n  \"total_amount\": \"$120\"\n}");
        assert!(prompt.contains("ONLY on the provided JSON data"));
        assert!(prompt.contains("\"total_amount\": \"$120\""));
        assert!(prompt.trim_end().ends_with("Question: What is the total?"));
    }
}
