use minijinja::{context, Environment};
use shared::protocol::NotebookSummary;

pub(crate) struct Pages {
    env: Environment<'static>,
}

impl Pages {
    pub(crate) fn new() -> Result<Self, minijinja::Error> {
        let mut env = Environment::new();
        env.add_template("base.html", include_str!("../templates/base.html"))?;
        env.add_template("index.html", include_str!("../templates/index.html"))?;
        env.add_template("notebook.html", include_str!("../templates/notebook.html"))?;
        Ok(Self { env })
    }

    pub(crate) fn index(&self, notebooks: &[NotebookSummary]) -> Result<String, minijinja::Error> {
        self.env
            .get_template("index.html")?
            .render(context! { notebooks => notebooks })
    }

    /// `notebook_html` is exporter output and is embedded without escaping.
    pub(crate) fn notebook(&self, title: &str, notebook_html: &str) -> Result<String, minijinja::Error> {
        self.env.get_template("notebook.html")?.render(context! {
            title => title,
            notebook_html => notebook_html,
        })
    }
}

#[cfg(test)]
#[path = "tests/pages_tests.rs"]
mod tests;
