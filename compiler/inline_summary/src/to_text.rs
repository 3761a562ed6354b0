/// Something that renders as indented, line-based text.
pub trait ToText {
    #[must_use]
    fn to_text(&self, trailing_newline: bool) -> String {
        let mut builder = TextBuilder::default();
        self.build_text(&mut builder);
        builder.finish(trailing_newline)
    }
    fn build_text(&self, builder: &mut TextBuilder);
}

#[derive(Debug, Default)]
pub struct TextBuilder {
    text: String,
    indentation: usize,
}
impl TextBuilder {
    pub fn push_indented(&mut self, build_children: impl FnOnce(&mut Self)) {
        self.indentation += 1;
        build_children(self);
        self.indentation -= 1;
    }

    /// Starts a new line at the current indentation, unless nothing was
    /// written yet.
    pub fn push_line(&mut self, text: impl AsRef<str>) {
        if !self.text.is_empty() {
            self.text.push('\n');
            self.text.push_str(&"  ".repeat(self.indentation));
        }
        self.push(text);
    }
    pub fn push_lines<C>(
        &mut self,
        items: impl IntoIterator<Item = C>,
        mut push_item: impl FnMut(&mut Self, C),
    ) {
        for item in items {
            push_item(self, item);
        }
    }
    /// A heading line followed by its indented children. Nothing is written
    /// if there are no children.
    pub fn push_section<C>(
        &mut self,
        heading: impl AsRef<str>,
        children: impl IntoIterator<Item = C>,
        push_child: impl FnMut(&mut Self, C),
    ) {
        let mut children = children.into_iter().peekable();
        if children.peek().is_none() {
            return;
        }
        self.push_line(heading);
        self.push_indented(|builder| builder.push_lines(children, push_child));
    }

    pub fn push(&mut self, text: impl AsRef<str>) {
        self.text.push_str(text.as_ref());
    }

    #[must_use]
    pub fn finish(mut self, trailing_newline: bool) -> String {
        if trailing_newline && !self.text.is_empty() && !self.text.ends_with('\n') {
            self.push("\n");
        }
        self.text
    }
}
