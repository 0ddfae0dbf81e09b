//! Minimal CIF category reader for page-group configuration files
//!
//! The configuration source is the archive's native flat key/category record
//! format. Only the subset the configuration files use is supported:
//! `data_` block headers, single `_category.item value` pairs, `loop_`
//! tables, quoted values, and `;`-delimited multi-line values. A malformed
//! file is a fatal parse error; the rendering layer's best-effort policy
//! starts above this reader.

use std::collections::HashMap;
use wfm_common::{Error, Result};

use crate::db::row::DataRow;

/// Parsed category data: category name -> list of rows
#[derive(Debug, Default)]
pub struct CifData {
    categories: HashMap<String, Vec<DataRow>>,
}

impl CifData {
    /// Rows of one category; empty slice when the category is absent
    pub fn category(&self, name: &str) -> &[DataRow] {
        self.categories.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_category(&self, name: &str) -> bool {
        self.categories.contains_key(name)
    }
}

/// Parse a CIF document into category row lists
pub fn parse(text: &str) -> Result<CifData> {
    let mut parser = Parser {
        tokens: tokenize(text)?,
        pos: 0,
    };
    parser.parse()
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    /// `data_<name>` block header
    DataBlock,
    /// `loop_` keyword
    Loop,
    /// `_category.item` tag
    Tag(String, String),
    /// Bare, quoted, or `;`-delimited value
    Value(String),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn parse(&mut self) -> Result<CifData> {
        let mut data = CifData::default();
        while let Some(token) = self.next() {
            match token {
                Token::DataBlock => {}
                Token::Loop => self.parse_loop(&mut data)?,
                Token::Tag(category, item) => {
                    let value = match self.next() {
                        Some(Token::Value(v)) => v,
                        _ => {
                            return Err(Error::Parse(format!(
                                "Missing value for _{}.{}",
                                category, item
                            )))
                        }
                    };
                    let rows = data.categories.entry(category).or_default();
                    // Consecutive single key/value pairs of one category
                    // describe a single row.
                    if rows.is_empty() {
                        rows.push(DataRow::new());
                    }
                    rows.last_mut()
                        .expect("row list is non-empty")
                        .insert(item, value);
                }
                Token::Value(v) => {
                    return Err(Error::Parse(format!("Unexpected value: {}", v)));
                }
            }
        }
        Ok(data)
    }

    fn parse_loop(&mut self, data: &mut CifData) -> Result<()> {
        let mut category = String::new();
        let mut items: Vec<String> = Vec::new();
        while let Some(Token::Tag(cat, item)) = self.peek().cloned() {
            if !category.is_empty() && cat != category {
                return Err(Error::Parse(format!(
                    "Mixed categories in loop_: {} and {}",
                    category, cat
                )));
            }
            category = cat;
            items.push(item);
            self.next();
        }
        if items.is_empty() {
            return Err(Error::Parse("loop_ without item tags".to_string()));
        }

        let mut values: Vec<String> = Vec::new();
        while matches!(self.peek(), Some(Token::Value(_))) {
            if let Some(Token::Value(v)) = self.next() {
                values.push(v);
            }
        }
        if values.len() % items.len() != 0 {
            return Err(Error::Parse(format!(
                "loop_ on {}: {} values do not fill rows of {} items",
                category,
                values.len(),
                items.len()
            )));
        }

        let rows = data.categories.entry(category).or_default();
        for chunk in values.chunks(items.len()) {
            let mut row = DataRow::new();
            for (item, value) in items.iter().zip(chunk) {
                row.insert(item.clone(), value.clone());
            }
            rows.push(row);
        }
        Ok(())
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }
}

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut lines = text.lines().peekable();

    while let Some(line) = lines.next() {
        // Multi-line value: leading `;` opens, a lone `;` closes
        if let Some(rest) = line.strip_prefix(';') {
            let mut value = rest.to_string();
            let mut closed = false;
            for body in lines.by_ref() {
                if body.trim_end() == ";" {
                    closed = true;
                    break;
                }
                if !value.is_empty() {
                    value.push('\n');
                }
                value.push_str(body);
            }
            if !closed {
                return Err(Error::Parse("Unterminated ; value".to_string()));
            }
            tokens.push(Token::Value(value));
            continue;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        tokenize_line(trimmed, &mut tokens)?;
    }
    Ok(tokens)
}

fn tokenize_line(line: &str, tokens: &mut Vec<Token>) -> Result<()> {
    let mut chars = line.char_indices().peekable();
    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '\'' || c == '"' {
            chars.next();
            let open = start + c.len_utf8();
            let mut end = None;
            for (i, qc) in chars.by_ref() {
                if qc == c {
                    end = Some(i);
                    break;
                }
            }
            let end = end.ok_or_else(|| Error::Parse(format!("Unterminated quote: {}", line)))?;
            tokens.push(Token::Value(line[open..end].to_string()));
            continue;
        }

        let mut end = line.len();
        while let Some(&(i, wc)) = chars.peek() {
            if wc.is_whitespace() {
                end = i;
                break;
            }
            chars.next();
        }
        let word = &line[start..end];

        if word == "loop_" {
            tokens.push(Token::Loop);
        } else if word.starts_with("data_") {
            tokens.push(Token::DataBlock);
        } else if let Some(tag) = word.strip_prefix('_') {
            let (category, item) = tag
                .split_once('.')
                .ok_or_else(|| Error::Parse(format!("Invalid tag: {}", word)))?;
            tokens.push(Token::Tag(category.to_string(), item.to_string()));
        } else {
            tokens.push(Token::Value(word.to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_loop_rows() {
        let data = parse(
            r#"data_config
loop_
_page_template_alias.id
_page_template_alias.page_id
login_tmplt level1_tmplt
other_tmplt summary_tmplt
"#,
        )
        .unwrap();

        let rows = data.category("page_template_alias");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("id").unwrap(), "login_tmplt");
        assert_eq!(rows[1].get("page_id").unwrap(), "summary_tmplt");
    }

    #[test]
    fn parse_quoted_and_multiline_values() {
        let data = parse(
            "data_config\nloop_\n_page_template.id\n_page_template.type\n_page_template.page\nheader_tmplt inline 'Deposition Manager'\nbody_tmplt inline\n;<div>\n  %(content)s\n</div>\n;\n",
        )
        .unwrap();

        let rows = data.category("page_template");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("page").unwrap(), "Deposition Manager");
        assert_eq!(rows[1].get("page").unwrap(), "<div>\n  %(content)s\n</div>");
    }

    #[test]
    fn single_pairs_form_one_row() {
        let data = parse("data_x\n_options.id main\n_options.value yes\n").unwrap();
        let rows = data.category("options");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("id").unwrap(), "main");
        assert_eq!(rows[0].get("value").unwrap(), "yes");
    }

    #[test]
    fn ragged_loop_is_fatal() {
        let err = parse("loop_\n_t.a\n_t.b\nx y z\n").unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn missing_category_reads_empty() {
        let data = parse("data_x\n").unwrap();
        assert!(data.category("nothing").is_empty());
    }
}
