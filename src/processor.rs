use std::fmt;
use std::rc::Rc;

use log::{debug, trace};

use crate::MAX_RECURSION_DEPTH;
use crate::ast::{Group, Node};
use crate::error::{Error, Result};
use crate::filter::{Lookahead, Rewrite};
use crate::parser::parse;

/// A macro body implemented in Rust. It receives exactly as many arguments
/// as the macro declares and returns the nodes to rescan.
pub type NativeFn = Rc<dyn Fn(&[Node]) -> Result<Group>>;

#[derive(Clone)]
pub enum Body {
    /// Tree with `#n` parameters, substituted on every expansion
    Template(Group),
    Native(NativeFn),
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Template(group) => f.debug_tuple("Template").field(group).finish(),
            Body::Native(_) => f.write_str("Native(..)"),
        }
    }
}

/// A macro or one half of an environment.
#[derive(Debug, Clone)]
pub struct Macro {
    /// Number of arguments, 0 to 9
    pub args: usize,
    /// Value of the first argument when the call gives no `[...]`
    pub default: Option<Group>,
    pub body: Body,
}

impl Macro {
    pub fn template(args: usize, default: Option<Group>, body: Group) -> Self {
        Self {
            args,
            default,
            body: Body::Template(body),
        }
    }

    pub fn native(args: usize, body: impl Fn(&[Node]) -> Result<Group> + 'static) -> Self {
        Self {
            args,
            default: None,
            body: Body::Native(Rc::new(body)),
        }
    }
}

/// Registry of macro definitions.
///
/// Backed by a persistent map, so cloning is cheap and clones share storage
/// until one of them is written to.
#[derive(Debug, Default, Clone)]
pub struct MacroRegistry(im::HashMap<String, Rc<Macro>>);

impl MacroRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load macro definitions from source text.
    /// The source is expanded and discarded; only its definitions are kept.
    pub fn load(&mut self, source: &str) -> Result<()> {
        let mut expander = Expander::new(self.clone());
        expander.expand(source)?;
        *self = expander.into_registry();
        Ok(())
    }

    /// Register a definition, replacing any previous one of the same name.
    pub fn define(&mut self, name: impl Into<String>, definition: Macro) {
        self.0.insert(name.into(), Rc::new(definition));
    }

    pub fn get(&self, name: &str) -> Option<&Rc<Macro>> {
        self.0.get(name)
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Defined names, in no particular order. Environments appear twice, as
    /// `name` and `endname`.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

enum SpecBody {
    Source(String),
    Native(usize, NativeFn),
}

/// Description of a macro for [`Expander::add_macros`].
pub struct MacroSpec {
    body: SpecBody,
    args: Option<usize>,
    default: Option<String>,
}

impl MacroSpec {
    /// A body written in source text. Takes no arguments unless
    /// [`args`](Self::args) says otherwise.
    pub fn source(body: impl Into<String>) -> Self {
        Self {
            body: SpecBody::Source(body.into()),
            args: None,
            default: None,
        }
    }

    /// A native body taking `arity` arguments.
    pub fn native(arity: usize, body: impl Fn(&[Node]) -> Result<Group> + 'static) -> Self {
        Self {
            body: SpecBody::Native(arity, Rc::new(body)),
            args: None,
            default: None,
        }
    }

    pub fn args(mut self, args: usize) -> Self {
        self.args = Some(args);
        self
    }

    /// Source text of the default first argument.
    pub fn default_arg(mut self, source: impl Into<String>) -> Self {
        self.default = Some(source.into());
        self
    }

    fn build(self) -> Result<Macro> {
        let (declared, body) = match self.body {
            SpecBody::Source(source) => (0, Body::Template(parse(&source)?)),
            SpecBody::Native(arity, body) => (arity, Body::Native(body)),
        };
        let args = self.args.unwrap_or(declared);
        if args > 9 {
            return Err(Error::MalformedArgumentCount(args.to_string()));
        }
        let default = self
            .default
            .map(|source| parse(&source).map(optional_argument))
            .transpose()?;
        Ok(Macro { args, default, body })
    }
}

/// Expands `\newcommand`-style macros and `\newenvironment` environments.
///
/// Definitions made at the top level of a document are kept and apply to
/// later calls on the same expander.
#[derive(Debug, Default, Clone)]
pub struct Expander {
    registry: MacroRegistry,
}

impl Expander {
    pub fn new(registry: MacroRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &MacroRegistry {
        &self.registry
    }

    pub fn into_registry(self) -> MacroRegistry {
        self.registry
    }

    /// Forget every definition.
    pub fn reset(&mut self) {
        self.registry = MacroRegistry::new();
    }

    /// Register several macros at once. Existing names are only overwritten
    /// when `replace` is set. Nothing is registered if any spec is invalid.
    pub fn add_macros<I, S>(&mut self, macros: I, replace: bool) -> Result<()>
    where
        I: IntoIterator<Item = (S, MacroSpec)>,
        S: Into<String>,
    {
        let mut registry = self.registry.clone();
        for (name, spec) in macros {
            let name = name.into();
            let definition = spec.build()?;
            if replace || !registry.is_defined(&name) {
                registry.define(name, definition);
            }
        }
        self.registry = registry;
        Ok(())
    }

    /// Parse `input`, expand it with [`demacro`](Self::demacro) and print the
    /// resulting tree back to text.
    pub fn expand(&mut self, input: &str) -> Result<String> {
        let root = parse(input)?;
        Ok(self.demacro(root)?.to_string())
    }

    /// Expand every definition and use of a macro or environment in `root`.
    ///
    /// Definitions are removed from the tree. On error the expander's
    /// registry is left as it was before the call.
    pub fn demacro(&mut self, root: Group) -> Result<Group> {
        let mut scopes = Scopes::new(self.registry.clone());
        let expanded = root.into_filtered(|node, lookahead| process(&mut scopes, node, lookahead))?;
        self.registry = scopes.into_root();
        Ok(expanded)
    }
}

/// Macro state of one tree level on the current traversal path.
#[derive(Debug, Default)]
struct Level {
    macros: MacroRegistry,
    /// Lookahead length right before each still unfinished expansion was
    /// pushed. An expansion is finished once the lookahead is shorter.
    expansions: Vec<usize>,
}

impl Level {
    fn settle(&mut self, remaining: usize) {
        self.expansions.retain(|&mark| mark <= remaining);
    }

    fn begin_expansion(&mut self, remaining: usize) -> Result<()> {
        if self.expansions.len() >= MAX_RECURSION_DEPTH {
            return Err(Error::RecursionLimitExceeded {
                limit: MAX_RECURSION_DEPTH,
            });
        }
        self.expansions.push(remaining);
        Ok(())
    }
}

/// One [`Level`] per group from the root down to the node being visited.
/// A level starts as a clone of its parent's table, so definitions made
/// inside a group stay inside it.
struct Scopes {
    levels: Vec<Level>,
}

impl Scopes {
    fn new(root: MacroRegistry) -> Self {
        Self {
            levels: vec![Level {
                macros: root,
                expansions: Vec::new(),
            }],
        }
    }

    fn enter(&mut self, depth: usize) -> &mut Level {
        self.levels.truncate(depth + 1);
        while self.levels.len() <= depth {
            let macros = self.levels.last().map(|level| level.macros.clone()).unwrap_or_default();
            self.levels.push(Level {
                macros,
                expansions: Vec::new(),
            });
        }
        &mut self.levels[depth]
    }

    fn into_root(self) -> MacroRegistry {
        self.levels.into_iter().next().map(|level| level.macros).unwrap_or_default()
    }
}

fn process(scopes: &mut Scopes, node: Node, lookahead: &mut Lookahead) -> Result<Rewrite> {
    let level = scopes.enter(lookahead.depth());
    level.settle(lookahead.len());

    let name = match node {
        Node::Command(name) => name,
        other => return Ok(Rewrite::Keep(other)),
    };

    match name.as_str() {
        "newcommand" | "renewcommand" | "providecommand" => {
            define_command(&name, &mut level.macros, lookahead)?;
            return Ok(Rewrite::Drop);
        }
        "newenvironment" | "renewenvironment" => {
            define_environment(&name, &mut level.macros, lookahead)?;
            return Ok(Rewrite::Drop);
        }
        _ => {}
    }

    if let Some(definition) = level.macros.get(&name).cloned() {
        expand(level, &name, &definition, lookahead)?;
        return Ok(Rewrite::Drop);
    }

    if name == "begin" || name == "end" {
        let target = lookahead.read_next()?;
        let mut environment = environment_name(&target);
        if name == "end" {
            environment.insert_str(0, "end");
        }
        if let Some(definition) = level.macros.get(&environment).cloned() {
            expand(level, &environment, &definition, lookahead)?;
            return Ok(Rewrite::Drop);
        }
        lookahead.push_front(target);
    }

    Ok(Rewrite::Keep(Node::Command(name)))
}

struct Signature {
    args: usize,
    default: Option<Group>,
    body: Node,
}

fn define_command(command: &str, macros: &mut MacroRegistry, lookahead: &mut Lookahead) -> Result<()> {
    let name = read_command_name(lookahead)?;
    let signature = read_signature(lookahead)?;

    let defined = macros.is_defined(&name);
    match command {
        "newcommand" if defined => return Err(Error::DuplicateMacro(name)),
        "providecommand" if defined => {
            debug!("\\providecommand: keeping existing \\{name}");
            return Ok(());
        }
        _ => {}
    }

    debug!("\\{command}: \\{name} with {} argument(s)", signature.args);
    let body = Group::new(signature.body.into_children());
    macros.define(name, Macro::template(signature.args, signature.default, body));
    Ok(())
}

fn define_environment(
    command: &str,
    macros: &mut MacroRegistry,
    lookahead: &mut Lookahead,
) -> Result<()> {
    let name = environment_name(&lookahead.read_next()?);
    let signature = read_signature(lookahead)?;
    let end = lookahead.read_next()?;

    if command == "newenvironment" && macros.is_defined(&name) {
        return Err(Error::DuplicateMacro(name));
    }

    debug!("\\{command}: {name} with {} argument(s)", signature.args);
    let begin = Group::new(signature.body.into_children());
    macros.define(format!("end{name}"), Macro::template(0, None, Group::new(end.into_children())));
    macros.define(name, Macro::template(signature.args, signature.default, begin));
    Ok(())
}

fn expand(level: &mut Level, name: &str, definition: &Macro, lookahead: &mut Lookahead) -> Result<()> {
    trace!("expanding \\{name}");
    let args = read_arguments(definition, lookahead)?;
    let expansion = match &definition.body {
        Body::Template(body) => substitute(body, &args)?,
        Body::Native(body) => body(&args)?,
    };
    level.begin_expansion(lookahead.len())?;
    lookahead.push_all_front(expansion.into_nodes());
    Ok(())
}

fn read_arguments(definition: &Macro, lookahead: &mut Lookahead) -> Result<Vec<Node>> {
    let mut args = Vec::with_capacity(definition.args);
    let mut required = definition.args;
    if required == 0 {
        return Ok(args);
    }

    if let Some(default) = &definition.default {
        match lookahead.try_read_next() {
            Some(next) if next.is_text("[") => {
                let optional = read_until_end_bracket(lookahead)?;
                let bracket = match optional.sole(false) {
                    Some(bracket @ Node::Bracket(_)) => Some(bracket.clone()),
                    _ => None,
                };
                args.push(bracket.unwrap_or_else(|| Node::Group(optional)));
            }
            Some(next) => {
                lookahead.push_front(next);
                args.push(Node::Group(default.clone()));
            }
            None => args.push(Node::Group(default.clone())),
        }
        required -= 1;
    }

    for _ in 0..required {
        args.push(lookahead.read_next()?);
    }
    Ok(args)
}

/// Copy `body` with every `#n` replaced by argument `n` and every deeper
/// parameter (`##n`, `####n`, ...) moved one level up.
fn substitute(body: &Group, args: &[Node]) -> Result<Group> {
    body.filter(|node, _| match node {
        Node::Parameter(parameter) if parameter.hashes == 1 => {
            let arg = usize::from(parameter.index)
                .checked_sub(1)
                .and_then(|index| args.get(index))
                .ok_or_else(|| Error::MalformedParameter(parameter.to_string()))?;
            Ok(Rewrite::Splice(arg.deep_copy()?.into_children()))
        }
        Node::Parameter(mut parameter) => {
            if !parameter.hashes.is_power_of_two() {
                return Err(Error::MalformedParameter(parameter.to_string()));
            }
            parameter.hashes /= 2;
            Ok(Rewrite::Keep(Node::Parameter(parameter)))
        }
        other => Ok(Rewrite::Keep(other)),
    })
}

/// `name`, optional `[args]` and `[default]`, then the body unit.
fn read_signature(lookahead: &mut Lookahead) -> Result<Signature> {
    let mut next = lookahead.read_next()?;

    let mut args = 0;
    if next.is_text("[") {
        args = argument_count(read_until_end_bracket(lookahead)?)?;
        next = lookahead.read_next()?;
    }

    let mut default = None;
    if next.is_text("[") {
        default = Some(optional_argument(read_until_end_bracket(lookahead)?));
        next = lookahead.read_next()?;
    }

    Ok(Signature {
        args,
        default,
        body: next,
    })
}

fn read_command_name(lookahead: &mut Lookahead) -> Result<String> {
    let mut node = lookahead.read_next()?;
    // `\newcommand*` behaves like `\newcommand`
    if node.is_text("*") {
        node = lookahead.read_next()?;
    }
    match node.unwrap_sole(true) {
        Node::Command(name) => Ok(name),
        other => Err(Error::MalformedMacroName(other.to_string())),
    }
}

/// Everything up to the next `]` at this level, without whitespace and comments.
fn read_until_end_bracket(lookahead: &mut Lookahead) -> Result<Group> {
    let mut group = Group::default();
    loop {
        let node = lookahead.read_next()?;
        if node.is_text("]") {
            return Ok(group);
        }
        group.push(node);
    }
}

fn argument_count(group: Group) -> Result<usize> {
    if let Some(Node::Text(text)) = group.sole(true) {
        if let Ok(count @ 0..=9) = text.parse::<usize>() {
            return Ok(count);
        }
    }
    Err(Error::MalformedArgumentCount(group.to_string()))
}

/// Contents of a `[...]` default, unwrapping one level of braces.
fn optional_argument(group: Group) -> Group {
    if let Some(Node::Bracket(inner)) = group.sole(false) {
        return inner.clone();
    }
    group
}

fn environment_name(node: &Node) -> String {
    match node {
        Node::Bracket(group) => group.to_string(),
        other => other.to_string(),
    }
}
