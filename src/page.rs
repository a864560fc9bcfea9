use minijinja::{context, Environment};
use serde::Serialize;

use crate::engine::{Part, Turn};

const INDEX_TEMPLATE: &str = include_str!("../templates/index.html");

#[derive(Debug, Serialize)]
struct TurnView<'a> {
    role: &'static str,
    texts: Vec<&'a str>,
    images: Vec<&'a str>,
}

impl<'a> From<&'a Turn> for TurnView<'a> {
    fn from(turn: &'a Turn) -> Self {
        let mut texts = Vec::new();
        let mut images = Vec::new();
        for part in &turn.parts {
            match part {
                Part::Text(text) => texts.push(text.as_str()),
                Part::Image { mime_type, .. } => images.push(mime_type.as_str()),
            }
        }
        Self {
            role: turn.role.as_str(),
            texts,
            images,
        }
    }
}

/// 渲染首页；模板名以 .html 结尾，minijinja 自动做 HTML 转义
pub fn render_index(model: &str, history: &[Turn]) -> Result<String, minijinja::Error> {
    let mut env = Environment::new();
    env.add_template("index.html", INDEX_TEMPLATE)?;

    let turns: Vec<TurnView<'_>> = history.iter().map(TurnView::from).collect();
    let template = env.get_template("index.html")?;
    template.render(context! { model => model, turns => turns })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Message;

    #[test]
    fn renders_turns_and_escapes_text() {
        let history = vec![
            Turn::user(Message::text("<b>hi</b>")),
            Turn::model("hello & welcome".to_string()),
        ];

        let html = render_index("gemini-2.5-flash", &history).expect("render");

        assert!(html.contains("<h1>gemini-2.5-flash</h1>"));
        assert!(html.contains("&lt;b&gt;hi&lt;&#x2f;b&gt;") || html.contains("&lt;b&gt;hi&lt;/b&gt;"));
        assert!(html.contains("hello &amp; welcome"));
        assert!(!html.contains("No messages yet."));
    }

    #[test]
    fn empty_history_has_placeholder() {
        let html = render_index("m", &[]).expect("render");
        assert!(html.contains("No messages yet."));
    }
}
