use crate::error::{Diagnostic, DiagnosticKind, Span};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenType {
    // Single-character tokens
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    Comma,
    Colon,
    Dot,
    Minus,
    Plus,
    Slash,
    Star,
    Caret,

    // One or two character tokens
    Equal,
    EqualEqual,
    BangEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,

    // Literals
    Identifier,
    String,
    Character,
    Integer,
    Real,

    // Primitive type names: Integer, Real, String, Boolean, Character
    TypeName,

    // Keywords
    Declare,
    Constant,
    Set,
    Display,
    Input,
    Call,
    Module,
    Function,
    End,
    Return,
    If,
    Then,
    Else,
    Select,
    Case,
    Default,
    While,
    Do,
    Loop,
    Until,
    For,
    Each,
    In,
    To,
    Step,
    Break,
    Continue,
    Stop,
    Class,
    Public,
    Private,
    New,
    Ref,
    And,
    Or,
    Not,
    Mod,
    True,
    False,
    Null,

    // Special
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub token_type: TokenType,
    /// Source text of the token; the unquoted content for string and
    /// character literals, the canonical spelling for keywords.
    pub lexeme: String,
    pub span: Span,
}

impl Token {
    pub fn new(token_type: TokenType, lexeme: String, span: Span) -> Self {
        Self {
            token_type,
            lexeme,
            span,
        }
    }

    pub fn line(&self) -> usize {
        self.span.line
    }
}

const KEYWORDS: &[(&str, TokenType)] = &[
    ("Declare", TokenType::Declare),
    ("Constant", TokenType::Constant),
    ("Set", TokenType::Set),
    ("Display", TokenType::Display),
    ("Input", TokenType::Input),
    ("Call", TokenType::Call),
    ("Module", TokenType::Module),
    ("Function", TokenType::Function),
    ("End", TokenType::End),
    ("Return", TokenType::Return),
    ("If", TokenType::If),
    ("Then", TokenType::Then),
    ("Else", TokenType::Else),
    ("Select", TokenType::Select),
    ("Case", TokenType::Case),
    ("Default", TokenType::Default),
    ("While", TokenType::While),
    ("Do", TokenType::Do),
    ("Loop", TokenType::Loop),
    ("Until", TokenType::Until),
    ("For", TokenType::For),
    ("Each", TokenType::Each),
    ("In", TokenType::In),
    ("To", TokenType::To),
    ("Step", TokenType::Step),
    ("Break", TokenType::Break),
    ("Continue", TokenType::Continue),
    ("Stop", TokenType::Stop),
    ("Class", TokenType::Class),
    ("Public", TokenType::Public),
    ("Private", TokenType::Private),
    ("New", TokenType::New),
    ("Ref", TokenType::Ref),
    ("AND", TokenType::And),
    ("OR", TokenType::Or),
    ("NOT", TokenType::Not),
    ("MOD", TokenType::Mod),
    ("True", TokenType::True),
    ("False", TokenType::False),
    ("Null", TokenType::Null),
    ("Integer", TokenType::TypeName),
    ("Real", TokenType::TypeName),
    ("String", TokenType::TypeName),
    ("Boolean", TokenType::TypeName),
    ("Character", TokenType::TypeName),
];

/// Canonical spelling of the reserved word `token_type`, used in messages.
pub fn keyword_spelling(token_type: TokenType) -> Option<&'static str> {
    KEYWORDS
        .iter()
        .find(|(_, t)| *t == token_type && *t != TokenType::TypeName)
        .map(|(word, _)| *word)
}

/// Scanner over the source characters. Offsets in spans are character
/// offsets, which is what the diagnostic renderer expects.
pub struct Lexer {
    source: Vec<char>,
    tokens: Vec<Token>,
    diagnostics: Vec<Diagnostic>,
    start: usize,
    current: usize,
    line: usize,
    keywords: HashMap<&'static str, TokenType>,
    /// Lower-cased reserved word to its canonical spelling.
    folded: HashMap<String, &'static str>,
    /// Names spelled like a reserved word in another case that were
    /// declared as identifiers.
    declared: HashSet<String>,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        let mut keywords = HashMap::new();
        let mut folded = HashMap::new();
        for (word, token_type) in KEYWORDS {
            keywords.insert(*word, *token_type);
            folded.insert(word.to_lowercase(), *word);
        }

        Self {
            source: source.chars().collect(),
            tokens: Vec::new(),
            diagnostics: Vec::new(),
            start: 0,
            current: 0,
            line: 1,
            keywords,
            folded,
            declared: HashSet::new(),
        }
    }

    /// Tokenise the whole input. Problems are collected, never fatal; the
    /// token list always ends with `Eof`.
    pub fn scan_tokens(mut self) -> (Vec<Token>, Vec<Diagnostic>) {
        while !self.is_at_end() {
            self.start = self.current;
            self.scan_token();
        }

        self.tokens.push(Token::new(
            TokenType::Eof,
            "".to_string(),
            Span::new(self.current, self.current, self.line),
        ));

        (self.tokens, self.diagnostics)
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }

    fn scan_token(&mut self) {
        let c = self.advance();

        match c {
            '(' => self.add_token(TokenType::LeftParen),
            ')' => self.add_token(TokenType::RightParen),
            '[' => self.add_token(TokenType::LeftBracket),
            ']' => self.add_token(TokenType::RightBracket),
            ',' => self.add_token(TokenType::Comma),
            ':' => self.add_token(TokenType::Colon),
            '.' => self.add_token(TokenType::Dot),
            '-' => self.add_token(TokenType::Minus),
            '+' => self.add_token(TokenType::Plus),
            '*' => self.add_token(TokenType::Star),
            '^' => self.add_token(TokenType::Caret),
            '!' => {
                if self.match_char('=') {
                    self.add_token(TokenType::BangEqual);
                } else {
                    self.diagnostics.push(Diagnostic::lex_error(
                        self.current_span(),
                        "Unexpected character: '!'".to_string(),
                    ));
                }
            }
            '=' => {
                let token_type = if self.match_char('=') {
                    TokenType::EqualEqual
                } else {
                    TokenType::Equal
                };
                self.add_token(token_type);
            }
            '<' => {
                let token_type = if self.match_char('=') {
                    TokenType::LessEqual
                } else if self.match_char('>') {
                    TokenType::BangEqual
                } else {
                    TokenType::Less
                };
                self.add_token(token_type);
            }
            '>' => {
                let token_type = if self.match_char('=') {
                    TokenType::GreaterEqual
                } else {
                    TokenType::Greater
                };
                self.add_token(token_type);
            }
            '/' => {
                if self.match_char('/') {
                    // Comment goes until end of line
                    while self.peek() != '\n' && !self.is_at_end() {
                        self.advance();
                    }
                } else {
                    self.add_token(TokenType::Slash);
                }
            }
            ' ' | '\r' | '\t' => {}
            '\n' => self.line += 1,
            '"' => self.string(),
            '\'' => self.character(),
            c if c.is_ascii_digit() => self.number(),
            c if c.is_alphabetic() || c == '_' => self.identifier(),
            _ => {
                self.diagnostics.push(Diagnostic::lex_error(
                    self.current_span(),
                    format!("Unexpected character: '{}'", c),
                ));
            }
        }
    }

    fn advance(&mut self) -> char {
        match self.source.get(self.current) {
            Some(c) => {
                self.current += 1;
                *c
            }
            None => '\0',
        }
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.is_at_end() || self.peek() != expected {
            false
        } else {
            self.current += 1;
            true
        }
    }

    fn peek(&self) -> char {
        self.source.get(self.current).copied().unwrap_or('\0')
    }

    fn peek_next(&self) -> char {
        self.source.get(self.current + 1).copied().unwrap_or('\0')
    }

    fn current_span(&self) -> Span {
        Span::new(self.start, self.current, self.line)
    }

    fn text(&self, start: usize, end: usize) -> String {
        self.source[start..end].iter().collect()
    }

    /// Quoted literals may not span lines; an unterminated one runs to the
    /// end of its line and is still emitted.
    fn quoted(&mut self, quote: char) -> (String, bool) {
        while self.peek() != quote && self.peek() != '\n' && !self.is_at_end() {
            self.advance();
        }
        let content = self.text(self.start + 1, self.current);
        if self.peek() == quote {
            self.advance();
            (content, true)
        } else {
            (content, false)
        }
    }

    fn string(&mut self) {
        let (content, closed) = self.quoted('"');
        if !closed {
            self.diagnostics.push(Diagnostic::new_with_help(
                DiagnosticKind::Lexical,
                self.current_span(),
                "Unterminated string".to_string(),
                "Close the string with '\"' before the end of the line.".to_string(),
            ));
        }
        self.add_token_with_content(TokenType::String, content);
    }

    fn character(&mut self) {
        let (content, closed) = self.quoted('\'');
        if !closed {
            self.diagnostics.push(Diagnostic::lex_error(
                self.current_span(),
                "Unterminated character literal".to_string(),
            ));
        } else if content.chars().count() != 1 {
            self.diagnostics.push(Diagnostic::new_with_help(
                DiagnosticKind::Lexical,
                self.current_span(),
                format!("Character literal must hold exactly one character, found '{}'", content),
                "Use double quotes for text: \"...\"".to_string(),
            ));
        }
        let content = content.chars().next().map(String::from).unwrap_or_else(|| " ".to_string());
        self.add_token_with_content(TokenType::Character, content);
    }

    fn number(&mut self) {
        while self.peek().is_ascii_digit() {
            self.advance();
        }

        // Look for a fractional part.
        if self.peek() == '.' && self.peek_next().is_ascii_digit() {
            self.advance();
            while self.peek().is_ascii_digit() {
                self.advance();
            }
            self.add_token(TokenType::Real);
        } else {
            self.add_token(TokenType::Integer);
        }
    }

    fn identifier(&mut self) {
        while self.peek().is_alphanumeric() || self.peek() == '_' {
            self.advance();
        }

        let text = self.text(self.start, self.current);
        if let Some(token_type) = self.keywords.get(text.as_str()).copied() {
            self.add_token(token_type);
            return;
        }

        if self.declared.contains(&text) {
            self.add_token(TokenType::Identifier);
            return;
        }

        // A reserved word in the wrong case is repaired to the keyword,
        // unless it is being declared as a name.
        if let Some(canonical) = self.folded.get(&text.to_lowercase()).copied() {
            if self.at_declared_name() {
                self.declared.insert(text);
                self.add_token(TokenType::Identifier);
                return;
            }
            self.diagnostics.push(Diagnostic::syntax_error_with_help(
                self.current_span(),
                format!("Reserved word '{}' must be written '{}'", text, canonical),
                canonical.to_string(),
            ));
            let token_type = self.keywords[canonical];
            self.add_token_with_content(token_type, canonical.to_string());
            return;
        }

        self.add_token(TokenType::Identifier);
    }

    /// Whether the word being scanned sits where a declaration puts its
    /// name: after a type, `Ref`, `Module`, `Function` or `Class`, or after
    /// a class name that opens a declaration or parameter.
    fn at_declared_name(&self) -> bool {
        let mut recent = self.tokens.iter().rev();
        let Some(previous) = recent.next() else {
            return false;
        };
        if previous.line() != self.line {
            return false;
        }
        match previous.token_type {
            TokenType::TypeName | TokenType::Ref | TokenType::Module | TokenType::Function | TokenType::Class => true,
            TokenType::Identifier => match recent.next().map(|token| token.token_type) {
                Some(TokenType::Declare | TokenType::Constant | TokenType::Public | TokenType::Private) => true,
                Some(TokenType::LeftParen | TokenType::Comma) => self.on_routine_header(),
                _ => false,
            },
            _ => false,
        }
    }

    /// Whether the current line opens a Module or Function, so that names
    /// inside its parentheses are parameters.
    fn on_routine_header(&self) -> bool {
        self.tokens
            .iter()
            .rev()
            .take_while(|token| token.line() == self.line)
            .any(|token| matches!(token.token_type, TokenType::Module | TokenType::Function))
    }

    fn add_token(&mut self, token_type: TokenType) {
        let text = self.text(self.start, self.current);
        self.add_token_with_content(token_type, text);
    }

    fn add_token_with_content(&mut self, token_type: TokenType, content: String) {
        self.tokens.push(Token::new(token_type, content, self.current_span()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn types(source: &str) -> Vec<TokenType> {
        let (tokens, _) = Lexer::new(source).scan_tokens();
        tokens.into_iter().map(|t| t.token_type).collect()
    }

    #[test]
    fn keywords_and_operators() {
        assert_eq!(
            types("Set x = y MOD 2 <> 3"),
            vec![
                TokenType::Set,
                TokenType::Identifier,
                TokenType::Equal,
                TokenType::Identifier,
                TokenType::Mod,
                TokenType::Integer,
                TokenType::BangEqual,
                TokenType::Integer,
                TokenType::Eof,
            ]
        );
    }

    #[test]
    fn lines_are_tracked() {
        let (tokens, _) = Lexer::new("Display 1\n\n// note\nDisplay 2.5").scan_tokens();
        assert_eq!(tokens[0].line(), 1);
        assert_eq!(tokens[2].line(), 4);
        assert_eq!(tokens[3].token_type, TokenType::Real);
    }

    #[test]
    fn wrong_case_keyword_is_repaired_with_a_diagnostic() {
        let (tokens, diagnostics) = Lexer::new("while True").scan_tokens();
        assert_eq!(tokens[0].token_type, TokenType::While);
        assert_eq!(tokens[0].lexeme, "While");
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].help.as_deref(), Some("While"));
    }

    #[test]
    fn declared_name_spelled_like_a_keyword_stays_an_identifier() {
        let (tokens, diagnostics) = Lexer::new("Declare Integer step = 2\nDisplay step\nend If").scan_tokens();
        assert_eq!(tokens[2].token_type, TokenType::Identifier);
        assert_eq!(tokens[6].token_type, TokenType::Identifier);
        assert_eq!(tokens[6].lexeme, "step");
        // Still a keyword where no such name was declared.
        assert_eq!(tokens[7].token_type, TokenType::End);
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn keyword_inside_call_arguments_is_still_repaired() {
        let (tokens, diagnostics) = Lexer::new("Call check(a and b)").scan_tokens();
        assert_eq!(tokens[4].token_type, TokenType::And);
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn unterminated_string_keeps_going() {
        let (tokens, diagnostics) = Lexer::new("Display \"abc\nDisplay 1").scan_tokens();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(tokens[1].lexeme, "abc");
        assert_eq!(tokens[2].token_type, TokenType::Display);
    }

    #[test]
    fn character_literal() {
        let (tokens, diagnostics) = Lexer::new("'q'").scan_tokens();
        assert!(diagnostics.is_empty());
        assert_eq!(tokens[0].token_type, TokenType::Character);
        assert_eq!(tokens[0].lexeme, "q");
    }
}
