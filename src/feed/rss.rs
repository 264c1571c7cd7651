//! RSS 2.0 rendering of a feed page.

use anyhow::{Context, Result};
use chrono::NaiveTime;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;

use crate::bandcamp::player_url;
use crate::storage::Release;

/// Player iframe shown as each item's body
fn player_embed(release_id: &str) -> String {
    format!(
        r#"<iframe style="border: 0; width: 400px; height: 400px;" src="{}" seamless></iframe>"#,
        player_url(release_id)
    )
}

/// `(prefix) artist - title`
pub fn item_title(release: &Release) -> String {
    format!("({}) {} - {}", release.prefix, release.artist, release.title)
}

fn write_text_element(writer: &mut Writer<Cursor<Vec<u8>>>, name: &str, text: &str) -> Result<()> {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .with_context(|| format!("Failed to write {} element", name))?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .with_context(|| format!("Failed to write {} text", name))?;
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .with_context(|| format!("Failed to write {} end", name))?;
    Ok(())
}

/// Render releases as an RSS 2.0 document.
///
/// `link` is the public URL of the feed itself. Items keep the order of
/// `releases`; each is dated at midnight UTC on its release day.
pub fn render_feed(name: &str, link: &str, releases: &[Release]) -> Result<String> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .context("Failed to write XML declaration")?;

    let mut rss = BytesStart::new("rss");
    rss.push_attribute(("version", "2.0"));
    writer
        .write_event(Event::Start(rss))
        .context("Failed to write rss element")?;
    writer
        .write_event(Event::Start(BytesStart::new("channel")))
        .context("Failed to write channel element")?;

    write_text_element(&mut writer, "title", name)?;
    write_text_element(&mut writer, "link", link)?;
    write_text_element(&mut writer, "description", name)?;

    for release in releases {
        writer
            .write_event(Event::Start(BytesStart::new("item")))
            .context("Failed to write item element")?;

        write_text_element(&mut writer, "title", &item_title(release))?;
        write_text_element(&mut writer, "link", &release.url)?;

        let mut guid = BytesStart::new("guid");
        guid.push_attribute(("isPermaLink", "false"));
        writer
            .write_event(Event::Start(guid))
            .context("Failed to write guid element")?;
        writer
            .write_event(Event::Text(BytesText::new(&release.id)))
            .context("Failed to write guid text")?;
        writer
            .write_event(Event::End(BytesEnd::new("guid")))
            .context("Failed to write guid end")?;

        let published = release.date.and_time(NaiveTime::MIN).and_utc().to_rfc2822();
        write_text_element(&mut writer, "pubDate", &published)?;
        write_text_element(&mut writer, "description", &player_embed(&release.id))?;

        writer
            .write_event(Event::End(BytesEnd::new("item")))
            .context("Failed to write item end")?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("channel")))
        .context("Failed to write channel end")?;
    writer
        .write_event(Event::End(BytesEnd::new("rss")))
        .context("Failed to write rss end")?;

    let result = writer.into_inner().into_inner();
    String::from_utf8(result).context("Generated RSS contains invalid UTF-8")
}
