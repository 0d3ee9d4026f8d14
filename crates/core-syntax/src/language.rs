//! State integration: the language facet, the parse-state field, and the
//! tree accessors built on top of them.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use core_state::{
    EditorState, Facet, FacetConfig, FieldConfig, StateEffectType, StateField, Transaction,
};

use crate::context::ParseContext;
use crate::parser::{Parser, SkippingParser};
use crate::tree::Tree;
use crate::work;

/// A language: a name plus the parser that produces its syntax trees.
pub struct Language {
    name: String,
    parser: Arc<dyn Parser>,
}

impl Language {
    pub fn new(name: impl Into<String>, parser: Arc<dyn Parser>) -> Arc<Language> {
        Arc::new(Language { name: name.into(), parser })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parser(&self) -> Arc<dyn Parser> {
        self.parser.clone()
    }

    /// The extension that installs this language (and, through the facet's
    /// enables, the parse-state field).
    pub fn extension(self: &Arc<Self>) -> core_state::Extension {
        language().of(self.clone())
    }
}

/// The active language. Combine: first value wins; enabling any language
/// installs the parse-state field.
pub fn language() -> &'static Facet<Arc<Language>, Option<Arc<Language>>> {
    static FACET: OnceLock<Facet<Arc<Language>, Option<Arc<Language>>>> = OnceLock::new();
    FACET.get_or_init(|| {
        Facet::define(
            FacetConfig::new(|values: &[&Arc<Language>]| values.first().map(|v| (*v).clone()))
                .compare(|a, b| match (a, b) {
                    (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                    (None, None) => true,
                    _ => false,
                })
                .enables(language_state_field().extension()),
        )
    })
}

/// Per-state parse bookkeeping: the shared parse context plus a snapshot of
/// the tree it had when this state was made.
pub struct LanguageState {
    pub(crate) context: ParseContext,
    pub(crate) tree: Tree,
}

impl LanguageState {
    pub(crate) fn from_context(context: ParseContext) -> LanguageState {
        let tree = context.tree();
        LanguageState { context, tree }
    }

    /// The syntax tree snapshot for this state.
    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn context(&self) -> &ParseContext {
        &self.context
    }

    fn init(state: &EditorState) -> LanguageState {
        let doc = state.doc().clone();
        let vp_to = work::INIT_VIEWPORT.min(doc.len());
        let parser: Arc<dyn Parser> = match state.facet(language()).as_ref() {
            Some(lang) => lang.parser(),
            None => Arc::new(SkippingParser::new(None)),
        };
        let context = ParseContext::create(parser, doc, (0, vp_to));
        if !context.work(Duration::from_millis(work::APPLY), Some(vp_to)) {
            context.take_tree();
        }
        LanguageState::from_context(context)
    }

    fn apply(this: &Arc<LanguageState>, tr: &Transaction) -> Arc<LanguageState> {
        if !tr.doc_changed() && this.tree.ptr_eq(&this.context.tree()) {
            return this.clone();
        }
        let new_context = this.context.changes(tr.changes(), tr.new_doc());
        // After an edit the tree length is reset, but a synchronous slice
        // usually restores coverage up to the viewport before the host
        // repaints.
        let upto = if this.context.tree_len() == tr.start_state().doc().len() {
            None
        } else {
            let mapped = match tr.changes().map_pos(this.context.tree_len(), -1) {
                Ok(mapped) => mapped,
                Err(err) => unreachable!("tree length lies inside the document: {err}"),
            };
            Some(mapped.max(new_context.viewport().1))
        };
        if !new_context.work(Duration::from_millis(work::APPLY), upto) {
            new_context.take_tree();
        }
        Arc::new(LanguageState::from_context(new_context))
    }
}

/// Effect used by the worker to publish a refreshed parse state.
pub(crate) fn set_state_effect() -> &'static StateEffectType<LanguageState> {
    static TYPE: OnceLock<StateEffectType<LanguageState>> = OnceLock::new();
    TYPE.get_or_init(StateEffectType::define)
}

/// The field holding the parse state. Installed by the language facet.
pub fn language_state_field() -> &'static StateField<LanguageState> {
    static FIELD: OnceLock<StateField<LanguageState>> = OnceLock::new();
    FIELD.get_or_init(|| {
        StateField::define(FieldConfig::new(LanguageState::init, |value, tr| {
            for effect in tr.effects() {
                if let Some(new_state) = effect.value(set_state_effect()) {
                    return new_state;
                }
            }
            let old_language = tr.start_state().facet(language());
            let new_language = tr.state().facet(language());
            let same = match (old_language.as_ref(), new_language.as_ref()) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            };
            if !same {
                return Arc::new(LanguageState::init(&tr.state()));
            }
            LanguageState::apply(value, tr)
        }))
    })
}

/// The syntax tree for a state: always a prefix `0..tree_len` of the
/// current document, possibly empty when no parse has run.
pub fn syntax_tree(state: &EditorState) -> Tree {
    match state.try_field(language_state_field()) {
        Some(parse_state) => parse_state.tree.clone(),
        None => Tree::empty(),
    }
}

/// Whether a tree covering `0..upto` is already available.
pub fn syntax_tree_available(state: &EditorState, upto: usize) -> bool {
    state
        .try_field(language_state_field())
        .map(|parse_state| parse_state.context.is_done(upto))
        .unwrap_or(false)
}

/// Run the parser synchronously (up to `timeout`) until the tree covers
/// `upto`. Returns the tree on success. The viewport is temporarily widened
/// so skipped regions inside the requested range get parsed too.
pub fn ensure_syntax_tree(state: &EditorState, upto: usize, timeout: Duration) -> Option<Tree> {
    let parse_state = state.try_field(language_state_field())?;
    let context = &parse_state.context;
    let (viewport_from, viewport_to) = context.viewport();
    context.update_viewport(0, upto);
    let result = if context.is_done(upto) || context.work(timeout, Some(upto)) {
        Some(context.tree())
    } else {
        None
    };
    context.update_viewport(viewport_from, viewport_to);
    result
}

/// The string used for one unit of indentation. Must be all spaces or all
/// tabs; a mixed or empty unit is a configuration error.
pub fn indent_unit() -> &'static Facet<String, String> {
    static FACET: OnceLock<Facet<String, String>> = OnceLock::new();
    FACET.get_or_init(|| {
        Facet::define(
            FacetConfig::new(|values: &[&String]| {
                values.first().map(|v| (*v).clone()).unwrap_or_else(|| "  ".to_string())
            })
            .compare(|a, b| a == b)
            .validate(|values| {
                for unit in values {
                    let all_spaces = !unit.is_empty() && unit.chars().all(|c| c == ' ');
                    let all_tabs = !unit.is_empty() && unit.chars().all(|c| c == '\t');
                    if !all_spaces && !all_tabs {
                        return Err(format!(
                            "invalid indent unit {unit:?}: must be spaces or tabs"
                        ));
                    }
                }
                Ok(())
            }),
        )
    })
}
