//! Prompt templates for page extraction, the improve pass and raw-text cleanup.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth** — changing the block schema or an
//!    instruction requires editing exactly one place.
//!
//! 2. **Testability** — unit tests render prompts from a [`PromptContext`]
//!    directly, without a backend, which makes prompt regressions easy to catch.
//!
//! Rendering is plain string assembly with conditional sections: a section is
//! emitted only when the value driving it is present in the context, so the
//! model never sees an empty "Previous headings" heading.

use crate::context::PromptContext;

const DEFAULT_PREAMBLE: &str =
    "You are an expert for document parsing. You are precise, structured and always follow the given instructions.";

/// Description of every block type the model may emit.
pub const CONTENT_BLOCK_TYPES: &str = r#"## Content block types

### type = 'heading'
- content: The full heading text, including numbering.
- heading_level: An integer representing the hierarchy. 1 for main headings and subheadings follow numerically.

### type = 'text'
- content: Plain body text formatted with Markdown (e.g., paragraphs, lists).

### type = 'table'
- content: Tabular data formatted using Markdown.

### type = 'footer'
- content: Text appearing at the bottom of the page, separate from the main content.

### type = 'table-of-contents'
- content: Document structure outline (headings and page numbers).

### type = 'image'
- content: Concise description of the image if relevant, excluding logos or decorative elements. For diagrams, include the numeric data in tabular form and a detailed description. Use the same language as the page text.
- image_number: Reference the image_number from the enumerated embedded images, if provided."#;

const BLOCK_SCHEMA: &str = r#"  'page_content_blocks': [
    {
      'type': 'heading | text | table | footer | table-of-contents | image',
      'content': 'The content as Markdown text following the task and instructions',
      'heading_level': null | 1, 2, ...,
      'image_number': null | 1, 2, ...
    },
    ...
  ]"#;

fn preamble(ctx: &PromptContext) -> &str {
    ctx.system_prompt_preamble.as_deref().unwrap_or(DEFAULT_PREAMBLE)
}

fn push_custom_instructions(out: &mut String, ctx: &PromptContext) {
    for instruction in ctx.custom_instructions.iter().flatten() {
        out.push_str("* ");
        out.push_str(instruction);
        out.push('\n');
    }
}

fn push_raw_text(out: &mut String, ctx: &PromptContext) {
    if let Some(raw) = &ctx.raw_extracted_text {
        out.push_str("# Raw extracted pdf page text\n\n<raw_extracted_text>\n");
        out.push_str(raw);
        out.push_str("\n</raw_extracted_text>\n\n");
    }
}

/// System prompt of the primary extraction call.
pub fn extract_system_prompt(ctx: &PromptContext) -> String {
    let mut out = String::with_capacity(4096);
    out.push_str(preamble(ctx));
    out.push_str("\n\nYou are provided with:\n\n");
    if ctx.previous_parsed_pages.is_some() {
        out.push_str("* The structured content of previous pages.\n");
    }
    if ctx.previous_headings.is_some() {
        out.push_str("* A list of headings parsed from previous pages.\n");
    }
    if ctx.raw_extracted_text.is_some() {
        out.push_str("* The raw extracted text from a PDF page, which may be messy due to a complicated layout.\n");
    }
    if PromptContext::flag(ctx.use_vision) {
        out.push_str("* An image of the full PDF page.\n");
    }
    if PromptContext::flag(ctx.embedded_images) {
        out.push_str("* Enumerated embedded images from the full PDF page.\n");
    }

    out.push_str(
        "\n# Task overview\n\n\
Your goal is to analyze the provided inputs and structure the content of the PDF page into discrete content blocks. \
Each block must be classified and ordered based on the natural reading sequence.\n\n",
    );
    out.push_str(CONTENT_BLOCK_TYPES);
    out.push_str(
        "\n\n## Instructions\n\n\
* Include all provided text and fully represent the page with content blocks.\n\
* Follow natural reading order, considering typical page layouts.\n",
    );
    push_custom_instructions(&mut out, ctx);

    out.push_str("\n# Output format\n\nReturn a single JSON object in this schema:\n```\n{\n");
    out.push_str(
        "  'page_layout_description': 'Walk step by step through the page in reading order from top to bottom and left to right and briefly describe each element and its associated content block type.',\n",
    );
    out.push_str(BLOCK_SCHEMA);
    out.push_str("\n}\n```\n");
    out
}

/// User prompt of the primary extraction call.
pub fn extract_user_prompt(ctx: &PromptContext) -> String {
    let mut out = String::new();
    if let Some(pages) = &ctx.previous_parsed_pages {
        out.push_str("# Previous structured pages\n\n");
        for page in pages {
            out.push_str("```\n{\n  'page_content_blocks': ");
            out.push_str(page);
            out.push_str("\n}\n```\n\n");
        }
    }
    if let Some(headings) = &ctx.previous_headings {
        out.push_str("# Previous headings\n\n");
        for heading in headings {
            out.push_str(heading);
            out.push('\n');
        }
        out.push('\n');
    }
    push_raw_text(&mut out, ctx);
    out.push_str("Use all provided information to create the JSON object of the page content.\n");
    out
}

/// System prompt of the improve pass.
pub fn improve_system_prompt(ctx: &PromptContext) -> String {
    let mut out = String::with_capacity(4096);
    out.push_str(preamble(ctx));
    out.push_str("\n\nYou are provided with:\n\n* The parsed content of a PDF page as a JSON object of content blocks.\n");
    if ctx.raw_extracted_text.is_some() {
        out.push_str("* The raw extracted text from the PDF page, which may be messy due to a complicated layout.\n");
    }
    if PromptContext::flag(ctx.use_vision) {
        out.push_str("* An image of the full PDF page.\n");
    }
    out.push_str(
        "\n# Task overview\n\n\
Your goal is to improve the parsed content of the PDF page, by comparing it to the given inputs. \
Make sure it adheres to the following instructions.\n\n",
    );
    out.push_str(CONTENT_BLOCK_TYPES);
    out.push_str(
        "\n\n## Instructions\n\n\
* Include any missing text in the improved output.\n\
* Rearrange content blocks to follow natural reading order.\n\
* Improve the content of each content block following the descriptions above.\n\
* Keep every image_number exactly as given in the parsed content.\n",
    );
    push_custom_instructions(&mut out, ctx);

    out.push_str("\n# Output format\n\nReturn a single JSON object of the improved content blocks, following this schema:\n```\n{\n");
    out.push_str(
        "  'improvement_analysis': 'Walk step by step through the page in reading order and compare the provided input data to the parsed content of the PDF page. Analyze all possible improvements following the instructions.',\n",
    );
    out.push_str(BLOCK_SCHEMA);
    out.push_str("\n}\n```\n");
    out
}

/// User prompt of the improve pass.
pub fn improve_user_prompt(ctx: &PromptContext) -> String {
    let mut out = String::from("# Parsed PDF page\n\n```\n");
    out.push_str(ctx.raw_parsed.as_deref().unwrap_or("{}"));
    out.push_str("\n```\n\n");
    push_raw_text(&mut out, ctx);
    out.push_str("Use all provided information to create an improved version of the JSON object of the parsed PDF page content.\n");
    out
}

/// User prompt of the raw-text cleanup call (no system prompt, plain text out).
pub fn raw_text_user_prompt(ctx: &PromptContext) -> String {
    let mut out = String::from(
        "Extract the complete text of the PDF page in natural reading order as plain text.\n\
Keep every word, number and symbol. Put separate columns one after another instead of interleaving their lines. \
Reproduce tables row by row with cells separated by ' | '. Do not add commentary.\n",
    );
    if PromptContext::flag(ctx.llm_raw_parser_use_vision) {
        out.push_str("Use the image of the page to resolve the layout.\n");
    }
    out.push('\n');
    match &ctx.raw_extracted_text {
        Some(raw) => {
            out.push_str("<raw_extracted_text>\n");
            out.push_str(raw);
            out.push_str("\n</raw_extracted_text>\n");
        }
        None => out.push_str("The page has no text layer; read the text from the image.\n"),
    }
    out
}
