use super::*;
use serde_json::json;

#[test]
fn parses_cells_and_outputs() {
    let text = json!({
        "nbformat": 4,
        "nbformat_minor": 5,
        "metadata": {"language_info": {"name": "python"}},
        "cells": [
            {"cell_type": "markdown", "metadata": {}, "source": ["# Title\n", "body"]},
            {
                "cell_type": "code",
                "execution_count": 2,
                "metadata": {},
                "source": "print(1)",
                "outputs": [
                    {"output_type": "stream", "name": "stdout", "text": ["1\n"]},
                    {"output_type": "execute_result", "execution_count": 2,
                     "data": {"text/plain": "2"}, "metadata": {}},
                    {"output_type": "error", "ename": "ValueError", "evalue": "bad",
                     "traceback": ["line"]}
                ]
            },
            {"cell_type": "raw", "metadata": {}, "source": "raw"}
        ]
    })
    .to_string();

    let notebook = Notebook::parse("t.ipynb", &text).expect("parse");
    assert_eq!(notebook.cells.len(), 3);
    assert_eq!(notebook.kernel_language(), Some("python"));

    match &notebook.cells[0] {
        Cell::Markdown { source } => assert_eq!(source.joined(), "# Title\nbody"),
        other => panic!("unexpected cell {other:?}"),
    }
    match &notebook.cells[1] {
        Cell::Code {
            execution_count,
            outputs,
            ..
        } => {
            assert_eq!(*execution_count, Some(2));
            assert_eq!(outputs.len(), 3);
            assert!(matches!(outputs[2], Output::Error { .. }));
        }
        other => panic!("unexpected cell {other:?}"),
    }
}

#[test]
fn unknown_cell_and_output_kinds_are_tolerated() {
    let text = json!({
        "nbformat": 4,
        "nbformat_minor": 5,
        "cells": [
            {"cell_type": "heading", "source": "old"},
            {"cell_type": "code", "source": "", "outputs": [{"output_type": "pyout"}]}
        ]
    })
    .to_string();
    let notebook = Notebook::parse("t.ipynb", &text).expect("parse");
    assert!(matches!(notebook.cells[0], Cell::Unknown));
    match &notebook.cells[1] {
        Cell::Code { outputs, .. } => assert!(matches!(outputs[0], Output::Unknown)),
        other => panic!("unexpected cell {other:?}"),
    }
}

#[test]
fn rejects_old_format_and_garbage() {
    let v3 = json!({"nbformat": 3, "nbformat_minor": 0, "worksheets": []}).to_string();
    assert!(matches!(
        Notebook::parse("old.ipynb", &v3),
        Err(ExportError::UnsupportedVersion(3))
    ));
    assert!(matches!(
        Notebook::parse("bad.ipynb", "not json"),
        Err(ExportError::Parse { .. })
    ));
}

#[test]
fn bundle_text_joins_line_arrays() {
    assert_eq!(bundle_text(&json!(["a\n", "b"])), Some("a\nb".to_string()));
    assert_eq!(bundle_text(&json!("x")), Some("x".to_string()));
    assert_eq!(bundle_text(&json!({"k": 1})), None);
}
