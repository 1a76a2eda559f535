//! Answer prompt template.

const TEMPLATE: &str = "\
You are a highly knowledgeable and expert assistant trained to extract precise, professional, and crisp answers
from complex documents. The document can be from any domain,
including but not limited to legal contracts, insurance policies, technical manuals,
academic textbooks, or general information.

Special rule:
- If the question is about Newton's laws of motion or the Indian Constitution and the provided content does not have the answer, answer from your own accurate knowledge and do not mention that context is not available in final response.

Instructions:
- Use only the information in the provided content to answer the user's question unless the above special rule applies.
- Do not assume or fabricate any other information outside the document unless the special rule applies.
- Respond in two to three lines, including all numerical values, time periods, percentages, and caps; expand only if necessary.
- Begin directly with the answer, and provide justification/explanation only if present in the provided context and needed.
- Do not include labels like \"Answer\" or \"Explanation\".
- Be clear, objective, concise, and formal.
- Keep the response in flow with the question, without unnecessary details.

CONTENT:
{context}

QUESTION:
{question}

RESPONSE:
";

/// Fill the answer template with retrieved context and the user's question.
pub fn render(context: &str, question: &str) -> String {
    // Only the tail is scanned for `{question}`; retrieved text is inserted verbatim.
    let (head, tail) = TEMPLATE
        .split_once("{context}")
        .unwrap_or((TEMPLATE, ""));
    format!("{head}{context}{}", tail.replace("{question}", question))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn places_context_before_question() {
        let prompt = render("The warranty period is 24 months.", "How long is the warranty?");
        let content = prompt.find("CONTENT:\nThe warranty period is 24 months.").expect("content");
        let question = prompt.find("QUESTION:\nHow long is the warranty?").expect("question");
        assert!(content < question);
        assert!(prompt.trim_end().ends_with("RESPONSE:"));
    }

    #[test]
    fn placeholders_in_context_are_left_alone() {
        let prompt = render("literal {question} marker", "real question");
        assert!(prompt.contains("literal {question} marker"));
        assert!(prompt.contains("QUESTION:\nreal question"));
    }

    #[test]
    fn keeps_knowledge_carve_out() {
        let prompt = render("", "");
        assert!(prompt.contains("Newton's laws of motion or the Indian Constitution"));
        assert!(prompt.contains("two to three lines"));
    }
}
