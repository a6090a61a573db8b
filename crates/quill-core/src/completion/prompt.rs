use crate::session::Mode;

/// Wrap raw user input in the instruction template for `mode`.
pub fn render_prompt(mode: Mode, input: &str) -> String {
    match mode {
        Mode::Writer => format!("Write a blog post or tweet about: {input}"),
        Mode::Rephraser => format!(
            "Rephrase the following in 3 styles: CEO, teenager, and comedian:\n\n{input}"
        ),
        Mode::Explainer => format!("Explain this simply like I'm 5:\n\n{input}"),
        Mode::Search => {
            format!("Answer this as if referring to your internal documents:\n\n{input}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_mode_embeds_input() {
        for mode in Mode::ALL {
            let prompt = render_prompt(mode, "the moon landing");
            assert!(prompt.ends_with("the moon landing"), "{mode}");
        }
    }

    #[test]
    fn writer_template_is_single_line() {
        assert_eq!(
            render_prompt(Mode::Writer, "AI"),
            "Write a blog post or tweet about: AI"
        );
    }

    #[test]
    fn rephraser_names_three_styles() {
        let prompt = render_prompt(Mode::Rephraser, "hello");
        assert!(prompt.contains("CEO, teenager, and comedian"));
        assert!(prompt.contains("\n\nhello"));
    }
}
