use crate::domain::{Paper, RenderedNewsletter, Schedule, Topic, UNSUBSCRIBE_URL_PLACEHOLDER};
use async_trait::async_trait;
use voca_rs::strip;

/// Run-wide information shared by every recipient of a digest.
#[derive(Debug, Clone)]
pub struct RenderContext {
    pub schedule: Schedule,
    pub site_base_url: String,
}

#[async_trait]
pub trait Renderer: Send + Sync {
    fn subject(&self, topic: &Topic) -> String;

    async fn render(
        &self,
        topic: &Topic,
        papers: &[Paper],
        context: &RenderContext,
    ) -> Result<RenderedNewsletter, anyhow::Error>;
}

/// Markdown digest listing the papers of a topic, converted to HTML.
#[derive(Debug, Default, Clone, Copy)]
pub struct DigestRenderer;

impl DigestRenderer {
    fn markdown(&self, topic: &Topic, papers: &[Paper], context: &RenderContext) -> String {
        let site = context.site_base_url.trim_end_matches('/');
        let mut content = format!(
            "# {}\n\nYour {} selection of new papers in **{}**.\n\n",
            self.subject(topic),
            context.schedule,
            topic.name
        );

        if papers.is_empty() {
            content.push_str("No new papers this time.\n\n");
        }
        for paper in papers {
            let blurb = paper.summary.as_deref().unwrap_or(&paper.abstract_text);
            content.push_str(&format!(
                "## [{}]({})\n\n*{}*\n\n{}\n\n[PDF]({})\n\n",
                paper.title.trim(),
                paper.main_page,
                paper.authors.trim(),
                blurb.trim(),
                paper.pdf_url
            ));
        }

        content.push_str(&format!(
            "---\n\nYou receive this email because you subscribed to {} on [ArxivDigest]({}).\n",
            topic.name, site
        ));

        content
    }
}

#[async_trait]
impl Renderer for DigestRenderer {
    fn subject(&self, topic: &Topic) -> String {
        format!("ArxivDigest - {}", topic.name)
    }

    async fn render(
        &self,
        topic: &Topic,
        papers: &[Paper],
        context: &RenderContext,
    ) -> Result<RenderedNewsletter, anyhow::Error> {
        let content = self.markdown(topic, papers, context);
        let html_body = markdown::to_html(&content);
        let mut text_body = strip::strip_tags(&html_body);
        // Filled in per recipient at send time.
        let html_body = format!(
            "{html_body}<p><a href=\"{UNSUBSCRIBE_URL_PLACEHOLDER}\">Unsubscribe</a></p>\n"
        );
        text_body.push_str(&format!("\nUnsubscribe: {UNSUBSCRIBE_URL_PLACEHOLDER}\n"));

        Ok(RenderedNewsletter {
            subject: self.subject(topic),
            html_body,
            text_body,
        })
    }
}
