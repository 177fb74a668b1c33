use super::*;

#[test]
fn index_links_execute_and_view_routes() {
    let pages = Pages::new().expect("pages");
    let html = pages
        .index(&[NotebookSummary {
            name: "sales <q1>.ipynb".into(),
            execute_url: "/execute/sales%20%3Cq1%3E.ipynb".into(),
            view_url: "/notebook/sales%20%3Cq1%3E.ipynb".into(),
        }])
        .expect("render");
    assert!(html.contains("sales &lt;q1&gt;.ipynb"));
    assert!(html.contains("%20%3Cq1%3E.ipynb"));
    assert!(html.contains(">Execute</a>"));
}

#[test]
fn empty_index_says_so() {
    let pages = Pages::new().expect("pages");
    let html = pages.index(&[]).expect("render");
    assert!(html.contains("No notebooks found."));
}

#[test]
fn notebook_page_embeds_fragment_verbatim() {
    let pages = Pages::new().expect("pages");
    let html = pages
        .notebook("a_executed.ipynb", "<div class=\"jp-Notebook\"></div>")
        .expect("render");
    assert!(html.starts_with("<!DOCTYPE html>"));
    assert!(html.contains("<title>a_executed.ipynb</title>"));
    assert!(html.contains("<div class=\"jp-Notebook\"></div>"));
}
