use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag, TagEnd};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};

/// Render untrusted model output as styled terminal lines.
///
/// Interprets CommonMark plus tables and strikethrough; a newline inside a
/// paragraph becomes a line break. Raw HTML never reaches the screen: block
/// and inline HTML events are dropped wholesale (script bodies disappear
/// with their block), and link destinations outside http/https/mailto are
/// omitted while their text is kept. Total on any input, including
/// incomplete constructs from a partially streamed reply — an unterminated
/// fence simply renders as code to the end of the text.
pub fn render_markdown(text: &str) -> Vec<Line<'static>> {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let parser = Parser::new_ext(text, options);
    let mut renderer = Renderer::default();
    for event in parser {
        renderer.event(event);
    }
    renderer.finish()
}

fn code_style() -> Style {
    Style::default().fg(Color::Yellow)
}

fn code_block_style() -> Style {
    Style::default().fg(Color::Green)
}

fn heading_style() -> Style {
    Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
}

fn link_style() -> Style {
    Style::default().fg(Color::Blue).add_modifier(Modifier::UNDERLINED)
}

/// Quote prefixes, fence languages, link destinations, rules.
fn dim_style() -> Style {
    Style::default().fg(Color::DarkGray)
}

/// Only plain web and mail destinations survive; anything else
/// (javascript:, data:, vbscript:, ...) is dropped.
fn is_safe_url(url: &str) -> bool {
    let lower = url.trim().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("mailto:")
}

#[derive(Default)]
struct Renderer {
    lines: Vec<Line<'static>>,
    spans: Vec<Span<'static>>,

    // Inline state
    strong: bool,
    emphasis: bool,
    strikethrough: bool,
    heading: Option<HeadingLevel>,
    link_dest: Option<String>,

    // Block state
    quote_depth: usize,
    in_code_block: bool,
    list_stack: Vec<Option<u64>>,

    // Table state
    table_row: Vec<String>,
    table_cell: Option<String>,
}

impl Renderer {
    fn event(&mut self, event: Event<'_>) {
        match event {
            Event::Start(tag) => self.start_tag(tag),
            Event::End(tag) => self.end_tag(tag),
            Event::Text(text) => self.text(&text),
            Event::Code(text) => {
                if let Some(cell) = self.table_cell.as_mut() {
                    cell.push_str(&text);
                } else {
                    self.spans.push(Span::styled(text.into_string(), code_style()));
                }
            }
            Event::SoftBreak | Event::HardBreak => {
                if let Some(cell) = self.table_cell.as_mut() {
                    cell.push(' ');
                } else {
                    self.flush_line();
                }
            }
            Event::Rule => {
                self.flush_line();
                self.lines.push(Line::from(Span::styled("────────", dim_style())));
                self.blank_line();
            }
            Event::TaskListMarker(checked) => {
                let marker = if checked { "[x] " } else { "[ ] " };
                self.spans.push(Span::raw(marker));
            }
            // Raw HTML is never interpreted or echoed.
            Event::Html(_) | Event::InlineHtml(_) => {}
            Event::FootnoteReference(_) => {}
        }
    }

    fn start_tag(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::Paragraph => {}
            Tag::Heading { level, .. } => {
                self.flush_line();
                self.heading = Some(level);
            }
            Tag::BlockQuote => self.quote_depth += 1,
            Tag::CodeBlock(kind) => {
                self.flush_line();
                self.in_code_block = true;
                if let CodeBlockKind::Fenced(lang) = kind {
                    if !lang.is_empty() {
                        self.lines
                            .push(Line::from(Span::styled(lang.into_string(), dim_style())));
                    }
                }
            }
            Tag::List(start) => self.list_stack.push(start),
            Tag::Item => {
                self.flush_line();
                let depth = self.list_stack.len().saturating_sub(1);
                let indent = "  ".repeat(depth);
                let marker = match self.list_stack.last_mut() {
                    Some(Some(n)) => {
                        let marker = format!("{}{}. ", indent, n);
                        *n += 1;
                        marker
                    }
                    _ => format!("{}• ", indent),
                };
                self.spans.push(Span::raw(marker));
            }
            Tag::Emphasis => self.emphasis = true,
            Tag::Strong => self.strong = true,
            Tag::Strikethrough => self.strikethrough = true,
            Tag::Link { dest_url, .. } => {
                self.link_dest = is_safe_url(&dest_url).then(|| dest_url.into_string());
            }
            // Image alt text renders as plain text; the destination is not
            // something a terminal can show.
            Tag::Image { .. } => {}
            Tag::Table(_) => self.flush_line(),
            Tag::TableHead => {}
            Tag::TableRow => self.table_row.clear(),
            Tag::TableCell => self.table_cell = Some(String::new()),
            Tag::HtmlBlock => {}
            Tag::FootnoteDefinition(_) | Tag::MetadataBlock(_) => {}
        }
    }

    fn end_tag(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Paragraph => {
                self.flush_line();
                if self.list_stack.is_empty() && self.quote_depth == 0 {
                    self.blank_line();
                }
            }
            TagEnd::Heading(_) => {
                self.flush_line();
                self.heading = None;
                self.blank_line();
            }
            TagEnd::BlockQuote => {
                self.flush_line();
                self.quote_depth = self.quote_depth.saturating_sub(1);
                if self.quote_depth == 0 {
                    self.blank_line();
                }
            }
            TagEnd::CodeBlock => {
                self.in_code_block = false;
                self.blank_line();
            }
            TagEnd::List(_) => {
                self.flush_line();
                self.list_stack.pop();
                if self.list_stack.is_empty() {
                    self.blank_line();
                }
            }
            TagEnd::Item => self.flush_line(),
            TagEnd::Emphasis => self.emphasis = false,
            TagEnd::Strong => self.strong = false,
            TagEnd::Strikethrough => self.strikethrough = false,
            TagEnd::Link => {
                if let Some(dest) = self.link_dest.take() {
                    self.spans
                        .push(Span::styled(format!(" ({})", dest), dim_style()));
                }
            }
            TagEnd::Image => {}
            TagEnd::Table => self.blank_line(),
            TagEnd::TableHead => self.emit_table_row(true),
            TagEnd::TableRow => self.emit_table_row(false),
            TagEnd::TableCell => {
                if let Some(cell) = self.table_cell.take() {
                    self.table_row.push(cell);
                }
            }
            TagEnd::HtmlBlock => {}
            TagEnd::FootnoteDefinition | TagEnd::MetadataBlock(_) => {}
        }
    }

    fn text(&mut self, text: &str) {
        if let Some(cell) = self.table_cell.as_mut() {
            cell.push_str(text);
            return;
        }
        if self.in_code_block {
            for line in text.lines() {
                self.lines.push(Line::from(Span::styled(
                    format!("  {}", line),
                    code_block_style(),
                )));
            }
            return;
        }
        let style = self.current_style();
        self.spans.push(Span::styled(text.to_string(), style));
    }

    fn current_style(&self) -> Style {
        let mut style = if self.heading.is_some() {
            heading_style()
        } else if self.link_dest.is_some() {
            link_style()
        } else {
            Style::default()
        };
        if self.strong {
            style = style.add_modifier(Modifier::BOLD);
        }
        if self.emphasis {
            style = style.add_modifier(Modifier::ITALIC);
        }
        if self.strikethrough {
            style = style.add_modifier(Modifier::CROSSED_OUT);
        }
        style
    }

    fn flush_line(&mut self) {
        if self.spans.is_empty() {
            return;
        }
        let mut spans = std::mem::take(&mut self.spans);
        if self.quote_depth > 0 {
            spans.insert(0, Span::styled("│ ".repeat(self.quote_depth), dim_style()));
        }
        self.lines.push(Line::from(spans));
    }

    fn blank_line(&mut self) {
        if self.lines.last().is_some_and(|line| !line.spans.is_empty()) {
            self.lines.push(Line::default());
        }
    }

    fn emit_table_row(&mut self, header: bool) {
        if self.table_row.is_empty() {
            return;
        }
        let text = self.table_row.join(" │ ");
        self.table_row.clear();
        let style = if header {
            Style::default().add_modifier(Modifier::BOLD)
        } else {
            Style::default()
        };
        self.lines.push(Line::from(Span::styled(text, style)));
    }

    fn finish(mut self) -> Vec<Line<'static>> {
        self.flush_line();
        while self.lines.last().is_some_and(|line| line.spans.is_empty()) {
            self.lines.pop();
        }
        self.lines
    }
}
