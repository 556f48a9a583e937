//! HTML rendering for the browser-facing poll pages.

use axum::http::StatusCode;
use polls_api::{IndexPage, QuestionDetail, ResultsPage};

pub const NO_POLLS_MESSAGE: &str = "No polls available.";

pub fn index(page: &IndexPage) -> String {
    let mut body = String::new();
    if page.latest_question_list.is_empty() {
        body.push_str("<p>");
        body.push_str(NO_POLLS_MESSAGE);
        body.push_str("</p>\n");
    } else {
        body.push_str("<ul>\n");
        for question in &page.latest_question_list {
            body.push_str(&format!(
                "<li><a href=\"/polls/{}/\">{}</a></li>\n",
                question.id,
                escape_html(&question.question_text)
            ));
        }
        body.push_str("</ul>\n");
    }
    layout("Polls", &body)
}

/// Vote form for one question. `error` is shown above the choices when the
/// previous submission was rejected.
pub fn detail(detail: &QuestionDetail, error: Option<&str>) -> String {
    let question = &detail.question;
    let mut body = format!(
        "<form action=\"/polls/{}/vote/\" method=\"post\">\n<fieldset>\n<legend><h1>{}</h1></legend>\n",
        question.id,
        escape_html(&question.question_text)
    );
    if let Some(message) = error {
        body.push_str(&format!("<p><strong>{}</strong></p>\n", escape_html(message)));
    }
    for (index, choice) in detail.choices.iter().enumerate() {
        let input_id = format!("choice{}", index + 1);
        body.push_str(&format!(
            "<input type=\"radio\" name=\"choice\" id=\"{input_id}\" value=\"{}\">\n<label for=\"{input_id}\">{}</label><br>\n",
            choice.id,
            escape_html(&choice.choice_text)
        ));
    }
    body.push_str("</fieldset>\n<input type=\"submit\" value=\"Vote\">\n</form>\n");
    layout(&question.question_text, &body)
}

pub fn results(page: &ResultsPage) -> String {
    let question = &page.question;
    let mut body = format!("<h1>{}</h1>\n<ul>\n", escape_html(&question.question_text));
    for choice in &page.choices {
        body.push_str(&format!(
            "<li>{} -- {} {}</li>\n",
            escape_html(&choice.choice_text),
            choice.votes,
            if choice.votes == 1 { "vote" } else { "votes" }
        ));
    }
    body.push_str("</ul>\n");
    body.push_str(&format!("<a href=\"/polls/{}/\">Vote again?</a>\n", question.id));
    layout(&question.question_text, &body)
}

pub fn error(status: StatusCode, message: &str) -> String {
    let title = status.canonical_reason().unwrap_or("Error");
    let body = format!("<h1>{}</h1>\n<p>{}</p>\n", escape_html(title), escape_html(message));
    layout(title, &body)
}

fn layout(title: &str, body: &str) -> String {
    let mut html = String::from("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
    html.push_str(&format!("<title>{}</title>\n", escape_html(title)));
    html.push_str("</head>\n<body>\n");
    html.push_str(body);
    html.push_str("</body>\n</html>\n");
    html
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
