//! Sandboxed Build Executor.
//!
//! Evaluates partitioned bundle text inside an isolated environment whose
//! root scope exposes exactly two host bindings: `defineComponentFactory`
//! and `establishAddon`. The evaluator is a constrained walk over the oxc
//! AST, strict about what it accepts, in the spirit of compile-time static
//! evaluation: anything outside the supported surface is an explicit error,
//! never a silent guess. Script callbacks are captured by source span and
//! never executed here; real engine modules are unreachable by construction
//! because the partition pass already elided every marker-rooted expression.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use oxc_allocator::Allocator;
use oxc_ast::ast::{
    Argument, ArrayExpressionElement, BindingPattern, Declaration, Expression, FormalParameters,
    FunctionBody, ObjectPropertyKind, Program, PropertyKey, Statement,
};
use oxc_parser::Parser;
use oxc_span::{GetSpan, SourceType, Span};

use crate::component::{produce_component, ArtifactKind, Component, FileArtifact, RegisterOptions, RegistrationHandle};
use crate::error::BuildError;
use crate::session::Session;

// ═══════════════════════════════════════════════════════════════════════════════
// VALUES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
enum Value<'p> {
    Undefined,
    /// Pure data: strings, numbers, booleans, null, arrays, objects.
    Data(serde_json::Value),
    Component(Component),
    Factory(Rc<Closure<'p>>),
    Closure(Rc<Closure<'p>>),
    Handle(RegistrationHandle),
    HostDefine,
    HostEstablish,
    Method(RegistrationHandle, HandleMethod),
}

impl Value<'_> {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Data(_) => "data",
            Value::Component(_) => "component",
            Value::Factory(_) => "component factory",
            Value::Closure(_) => "function",
            Value::Handle(_) => "registration handle",
            Value::HostDefine | Value::HostEstablish => "host function",
            Value::Method(..) => "handle function",
        }
    }

    fn truthy(&self) -> bool {
        match self {
            Value::Undefined => false,
            Value::Data(serde_json::Value::Null) => false,
            Value::Data(serde_json::Value::Bool(b)) => *b,
            Value::Data(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(0.0) != 0.0,
            Value::Data(serde_json::Value::String(s)) => !s.is_empty(),
            _ => true,
        }
    }
}

#[derive(Clone, Copy)]
enum HandleMethod {
    Kind(ArtifactKind),
    Script,
    Implement,
}

struct Closure<'p> {
    params: Vec<String>,
    body: &'p FunctionBody<'p>,
    /// Concise arrow body: the single expression statement is the return value.
    is_expression: bool,
    env: Env<'p>,
    span: Span,
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENVIRONMENT
// ═══════════════════════════════════════════════════════════════════════════════

struct Frame<'p> {
    vars: HashMap<String, Value<'p>>,
    parent: Option<Env<'p>>,
}

#[derive(Clone)]
struct Env<'p>(Rc<RefCell<Frame<'p>>>);

impl<'p> Env<'p> {
    fn root() -> Self {
        Env(Rc::new(RefCell::new(Frame {
            vars: HashMap::new(),
            parent: None,
        })))
    }

    fn child(&self) -> Self {
        Env(Rc::new(RefCell::new(Frame {
            vars: HashMap::new(),
            parent: Some(self.clone()),
        })))
    }

    fn define(&self, name: &str, value: Value<'p>) {
        self.0.borrow_mut().vars.insert(name.to_string(), value);
    }

    /// Assign to an already-declared binding somewhere up the scope chain.
    fn assign(&self, name: &str, value: Value<'p>) -> bool {
        let mut frame = self.0.borrow_mut();
        if let Some(slot) = frame.vars.get_mut(name) {
            *slot = value;
            return true;
        }
        match &frame.parent {
            Some(parent) => parent.assign(name, value),
            None => false,
        }
    }

    fn lookup(&self, name: &str) -> Option<Value<'p>> {
        let frame = self.0.borrow();
        if let Some(value) = frame.vars.get(name) {
            return Some(value.clone());
        }
        frame.parent.as_ref().and_then(|parent| parent.lookup(name))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVALUATOR
// ═══════════════════════════════════════════════════════════════════════════════

enum Flow<'p> {
    Normal,
    Return(Value<'p>),
}

struct Evaluator<'p> {
    source: &'p str,
    session: Session,
}

fn line_of(source: &str, offset: u32) -> usize {
    source[..(offset as usize).min(source.len())]
        .bytes()
        .filter(|b| *b == b'\n')
        .count()
        + 1
}

impl<'p> Evaluator<'p> {
    fn fail(&self, span: Span, message: impl Into<String>) -> BuildError {
        BuildError::Eval(format!(
            "{} (line {})",
            message.into(),
            line_of(self.source, span.start)
        ))
    }

    fn run_program(&self, program: &'p Program<'p>, env: &Env<'p>) -> Result<(), BuildError> {
        match self.exec_statements(&program.body, env)? {
            Flow::Normal | Flow::Return(_) => Ok(()),
        }
    }

    fn exec_statements(
        &self,
        statements: &'p [Statement<'p>],
        env: &Env<'p>,
    ) -> Result<Flow<'p>, BuildError> {
        for statement in statements {
            if let Flow::Return(value) = self.exec_statement(statement, env)? {
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_statement(
        &self,
        statement: &'p Statement<'p>,
        env: &Env<'p>,
    ) -> Result<Flow<'p>, BuildError> {
        match statement {
            Statement::VariableDeclaration(decl) => {
                self.exec_variable_declaration(decl, env)?;
                Ok(Flow::Normal)
            }
            Statement::FunctionDeclaration(func) => {
                self.exec_function_declaration(func, env)?;
                Ok(Flow::Normal)
            }
            Statement::ExpressionStatement(stmt) => {
                self.eval_expression(&stmt.expression, env)?;
                Ok(Flow::Normal)
            }
            Statement::ReturnStatement(ret) => {
                let value = match &ret.argument {
                    Some(expr) => self.eval_expression(expr, env)?,
                    None => Value::Undefined,
                };
                Ok(Flow::Return(value))
            }
            // Locals imported from real modules are unreachable at build time;
            // the partition pass already elided every use site.
            Statement::ImportDeclaration(import) => {
                use oxc_ast::ast::ImportDeclarationSpecifier;
                if let Some(specifiers) = &import.specifiers {
                    for specifier in specifiers {
                        let local = match specifier {
                            ImportDeclarationSpecifier::ImportSpecifier(s) => &s.local,
                            ImportDeclarationSpecifier::ImportDefaultSpecifier(s) => &s.local,
                            ImportDeclarationSpecifier::ImportNamespaceSpecifier(s) => &s.local,
                        };
                        env.define(local.name.as_str(), Value::Undefined);
                    }
                }
                Ok(Flow::Normal)
            }
            Statement::ExportNamedDeclaration(export) => {
                if let Some(declaration) = &export.declaration {
                    self.exec_declaration(declaration, env)?;
                }
                Ok(Flow::Normal)
            }
            Statement::ExportDefaultDeclaration(export) => {
                if let Some(expr) = export.declaration.as_expression() {
                    self.eval_expression(expr, env)?;
                }
                Ok(Flow::Normal)
            }
            Statement::EmptyStatement(_) => Ok(Flow::Normal),
            other => Err(self.fail(
                other.span(),
                "unsupported statement in build-time evaluation",
            )),
        }
    }

    fn exec_declaration(
        &self,
        declaration: &'p Declaration<'p>,
        env: &Env<'p>,
    ) -> Result<(), BuildError> {
        match declaration {
            Declaration::VariableDeclaration(decl) => self.exec_variable_declaration(decl, env),
            Declaration::FunctionDeclaration(func) => self.exec_function_declaration(func, env),
            other => Err(self.fail(other.span(), "unsupported declaration")),
        }
    }

    fn exec_variable_declaration(
        &self,
        decl: &'p oxc_ast::ast::VariableDeclaration<'p>,
        env: &Env<'p>,
    ) -> Result<(), BuildError> {
        for declarator in &decl.declarations {
            let BindingPattern::BindingIdentifier(id) = &declarator.id else {
                return Err(self.fail(
                    declarator.span(),
                    "destructuring bindings are not supported at build time",
                ));
            };
            let value = match &declarator.init {
                Some(init) => self.eval_expression(init, env)?,
                None => Value::Undefined,
            };
            env.define(id.name.as_str(), value);
        }
        Ok(())
    }

    fn exec_function_declaration(
        &self,
        func: &'p oxc_ast::ast::Function<'p>,
        env: &Env<'p>,
    ) -> Result<(), BuildError> {
        let Some(id) = &func.id else {
            return Err(self.fail(func.span(), "function declaration without a name"));
        };
        let Some(body) = &func.body else {
            return Err(self.fail(func.span(), "function declaration without a body"));
        };
        let closure = Closure {
            params: self.param_names(&func.params)?,
            body,
            is_expression: false,
            env: env.clone(),
            span: func.span(),
        };
        env.define(id.name.as_str(), Value::Closure(Rc::new(closure)));
        Ok(())
    }

    fn param_names(&self, params: &'p FormalParameters<'p>) -> Result<Vec<String>, BuildError> {
        let mut names = Vec::with_capacity(params.items.len());
        for param in &params.items {
            let BindingPattern::BindingIdentifier(id) = &param.pattern else {
                return Err(self.fail(
                    param.span(),
                    "only plain identifier parameters are supported at build time",
                ));
            };
            names.push(id.name.to_string());
        }
        Ok(names)
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Expressions
    // ───────────────────────────────────────────────────────────────────────────

    fn eval_expression(
        &self,
        expr: &'p Expression<'p>,
        env: &Env<'p>,
    ) -> Result<Value<'p>, BuildError> {
        match expr {
            Expression::StringLiteral(s) => Ok(Value::Data(serde_json::Value::String(
                s.value.to_string(),
            ))),
            Expression::NumericLiteral(n) => Ok(Value::Data(number(n.value))),
            Expression::BooleanLiteral(b) => Ok(Value::Data(serde_json::Value::Bool(b.value))),
            Expression::NullLiteral(_) => Ok(Value::Data(serde_json::Value::Null)),
            Expression::TemplateLiteral(template) => self.eval_template(template, env),
            Expression::Identifier(ident) => {
                if ident.name == "undefined" {
                    return Ok(Value::Undefined);
                }
                env.lookup(ident.name.as_str()).ok_or_else(|| {
                    self.fail(
                        ident.span,
                        format!("unresolved identifier \"{}\"", ident.name),
                    )
                })
            }
            Expression::ParenthesizedExpression(paren) => {
                self.eval_expression(&paren.expression, env)
            }
            Expression::ArrayExpression(array) => {
                let mut elements = Vec::with_capacity(array.elements.len());
                for element in &array.elements {
                    match element {
                        ArrayExpressionElement::SpreadElement(spread) => {
                            return Err(
                                self.fail(spread.span, "spread elements are not supported")
                            );
                        }
                        ArrayExpressionElement::Elision(elision) => {
                            return Err(self.fail(elision.span, "array holes are not supported"));
                        }
                        _ => {
                            let expr = element
                                .as_expression()
                                .expect("non-spread, non-elision element is an expression");
                            let value = self.eval_expression(expr, env)?;
                            elements.push(self.to_data(value, expr.span())?);
                        }
                    }
                }
                Ok(Value::Data(serde_json::Value::Array(elements)))
            }
            Expression::ObjectExpression(object) => {
                let mut map = serde_json::Map::new();
                for property in &object.properties {
                    let ObjectPropertyKind::ObjectProperty(prop) = property else {
                        return Err(
                            self.fail(property.span(), "spread properties are not supported")
                        );
                    };
                    let key = self.property_key(&prop.key, env)?;
                    let value = self.eval_expression(&prop.value, env)?;
                    map.insert(key, self.to_data(value, prop.value.span())?);
                }
                Ok(Value::Data(serde_json::Value::Object(map)))
            }
            Expression::ArrowFunctionExpression(arrow) => {
                let closure = Closure {
                    params: self.param_names(&arrow.params)?,
                    body: &arrow.body,
                    is_expression: arrow.expression,
                    env: env.clone(),
                    span: arrow.span(),
                };
                Ok(Value::Closure(Rc::new(closure)))
            }
            Expression::FunctionExpression(func) => {
                let Some(body) = &func.body else {
                    return Err(self.fail(func.span(), "function expression without a body"));
                };
                let closure = Closure {
                    params: self.param_names(&func.params)?,
                    body,
                    is_expression: false,
                    env: env.clone(),
                    span: func.span(),
                };
                Ok(Value::Closure(Rc::new(closure)))
            }
            Expression::StaticMemberExpression(member) => {
                let object = self.eval_expression(&member.object, env)?;
                self.member(object, member.property.name.as_str(), member.span)
            }
            Expression::ComputedMemberExpression(member) => {
                let object = self.eval_expression(&member.object, env)?;
                let key = self.eval_expression(&member.expression, env)?;
                match (&object, &key) {
                    (Value::Data(serde_json::Value::Array(items)), Value::Data(k)) => {
                        let index = k.as_u64().ok_or_else(|| {
                            self.fail(member.span, "array index must be a number")
                        })? as usize;
                        Ok(items
                            .get(index)
                            .cloned()
                            .map(Value::Data)
                            .unwrap_or(Value::Undefined))
                    }
                    (_, Value::Data(serde_json::Value::String(name))) => {
                        self.member(object, name.as_str(), member.span)
                    }
                    _ => Err(self.fail(member.span, "unsupported computed member access")),
                }
            }
            Expression::CallExpression(call) => {
                let callee = self.eval_expression(&call.callee, env)?;
                let mut args = Vec::with_capacity(call.arguments.len());
                for argument in &call.arguments {
                    if let Argument::SpreadElement(spread) = argument {
                        return Err(self.fail(spread.span, "spread arguments are not supported"));
                    }
                    let expr = argument
                        .as_expression()
                        .expect("non-spread argument is an expression");
                    args.push((self.eval_expression(expr, env)?, expr.span()));
                }
                self.call(callee, &args, call.span)
            }
            Expression::BinaryExpression(binary) => {
                use oxc_syntax::operator::BinaryOperator;
                if binary.operator != BinaryOperator::Addition {
                    return Err(self.fail(
                        binary.span,
                        "only `+` is supported in build-time expressions",
                    ));
                }
                let left = self.eval_expression(&binary.left, env)?;
                let right = self.eval_expression(&binary.right, env)?;
                self.add(left, right, binary.span)
            }
            Expression::UnaryExpression(unary) => {
                use oxc_syntax::operator::UnaryOperator;
                let argument = self.eval_expression(&unary.argument, env)?;
                match (unary.operator, argument) {
                    (UnaryOperator::UnaryNegation, Value::Data(serde_json::Value::Number(n))) => {
                        Ok(Value::Data(number(-n.as_f64().unwrap_or(0.0))))
                    }
                    (UnaryOperator::LogicalNot, value) => {
                        Ok(Value::Data(serde_json::Value::Bool(!value.truthy())))
                    }
                    (UnaryOperator::Void, _) => Ok(Value::Undefined),
                    _ => Err(self.fail(unary.span, "unsupported unary expression")),
                }
            }
            Expression::ConditionalExpression(cond) => {
                if self.eval_expression(&cond.test, env)?.truthy() {
                    self.eval_expression(&cond.consequent, env)
                } else {
                    self.eval_expression(&cond.alternate, env)
                }
            }
            Expression::AssignmentExpression(assignment) => {
                use oxc_ast::ast::AssignmentTarget;
                use oxc_syntax::operator::AssignmentOperator;
                if assignment.operator != AssignmentOperator::Assign {
                    return Err(
                        self.fail(assignment.span, "compound assignment is not supported")
                    );
                }
                let AssignmentTarget::AssignmentTargetIdentifier(target) = &assignment.left else {
                    return Err(self.fail(
                        assignment.span,
                        "only plain identifier assignment is supported",
                    ));
                };
                let value = self.eval_expression(&assignment.right, env)?;
                if !env.assign(target.name.as_str(), value.clone()) {
                    return Err(self.fail(
                        target.span,
                        format!("assignment to undeclared identifier \"{}\"", target.name),
                    ));
                }
                Ok(value)
            }
            other => Err(self.fail(
                other.span(),
                "unsupported expression in build-time evaluation",
            )),
        }
    }

    fn property_key(
        &self,
        key: &'p PropertyKey<'p>,
        env: &Env<'p>,
    ) -> Result<String, BuildError> {
        match key {
            PropertyKey::StaticIdentifier(id) => Ok(id.name.to_string()),
            PropertyKey::StringLiteral(s) => Ok(s.value.to_string()),
            other => {
                if let Some(expr) = other.as_expression() {
                    if let Value::Data(serde_json::Value::String(s)) =
                        self.eval_expression(expr, env)?
                    {
                        return Ok(s);
                    }
                }
                Err(self.fail(key.span(), "unsupported object key"))
            }
        }
    }

    fn eval_template(
        &self,
        template: &'p oxc_ast::ast::TemplateLiteral<'p>,
        env: &Env<'p>,
    ) -> Result<Value<'p>, BuildError> {
        let mut out = String::new();
        for (i, quasi) in template.quasis.iter().enumerate() {
            match &quasi.value.cooked {
                Some(cooked) => out.push_str(cooked.as_str()),
                None => out.push_str(quasi.value.raw.as_str()),
            }
            if let Some(expr) = template.expressions.get(i) {
                let value = self.eval_expression(expr, env)?;
                out.push_str(&self.display(&value, expr.span())?);
            }
        }
        Ok(Value::Data(serde_json::Value::String(out)))
    }

    fn display(&self, value: &Value<'p>, span: Span) -> Result<String, BuildError> {
        match value {
            Value::Undefined => Ok("undefined".to_string()),
            Value::Data(serde_json::Value::String(s)) => Ok(s.clone()),
            Value::Data(serde_json::Value::Number(n)) => Ok(display_number(n)),
            Value::Data(serde_json::Value::Bool(b)) => Ok(b.to_string()),
            Value::Data(serde_json::Value::Null) => Ok("null".to_string()),
            other => Err(self.fail(
                span,
                format!("cannot interpolate a {} into a string", other.type_name()),
            )),
        }
    }

    fn add(&self, left: Value<'p>, right: Value<'p>, span: Span) -> Result<Value<'p>, BuildError> {
        use serde_json::Value as Json;
        match (&left, &right) {
            (Value::Data(Json::Number(a)), Value::Data(Json::Number(b))) => Ok(Value::Data(
                number(a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0)),
            )),
            (Value::Data(Json::String(_)), _) | (_, Value::Data(Json::String(_))) => {
                let mut out = self.display(&left, span)?;
                out.push_str(&self.display(&right, span)?);
                Ok(Value::Data(Json::String(out)))
            }
            _ => Err(self.fail(span, "`+` requires numbers or strings")),
        }
    }

    fn member(
        &self,
        object: Value<'p>,
        name: &str,
        span: Span,
    ) -> Result<Value<'p>, BuildError> {
        match object {
            Value::Handle(handle) => {
                let method = match name {
                    "script" => HandleMethod::Script,
                    "implement" => HandleMethod::Implement,
                    other => match ArtifactKind::from_handle_name(other) {
                        Some(kind) => HandleMethod::Kind(kind),
                        None => {
                            return Err(self.fail(
                                span,
                                format!("unknown registration function \"{}\"", other),
                            ))
                        }
                    },
                };
                Ok(Value::Method(handle, method))
            }
            Value::Data(serde_json::Value::Object(map)) => Ok(map
                .get(name)
                .cloned()
                .map(Value::Data)
                .unwrap_or(Value::Undefined)),
            other => Err(self.fail(
                span,
                format!("cannot read property \"{}\" of a {}", name, other.type_name()),
            )),
        }
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Calls
    // ───────────────────────────────────────────────────────────────────────────

    fn call(
        &self,
        callee: Value<'p>,
        args: &[(Value<'p>, Span)],
        span: Span,
    ) -> Result<Value<'p>, BuildError> {
        match callee {
            Value::HostDefine => {
                let Some((Value::Closure(closure), _)) = args.first() else {
                    return Err(
                        self.fail(span, "defineComponentFactory() expects a callback function")
                    );
                };
                Ok(Value::Factory(closure.clone()))
            }
            Value::HostEstablish => {
                let Some((Value::Component(component), _)) = args.first() else {
                    return Err(self.fail(span, "establishAddon() expects a component"));
                };
                self.session.establish_addon(component.clone())?;
                Ok(Value::Undefined)
            }
            Value::Factory(closure) => {
                let component = produce_component(&self.session, |handle| {
                    let env = closure.env.child();
                    let mut bindings = closure.params.iter();
                    if let Some(first) = bindings.next() {
                        env.define(first, Value::Handle(handle.clone()));
                    }
                    for (i, name) in bindings.enumerate() {
                        let value = args.get(i).map(|(v, _)| v.clone()).unwrap_or(Value::Undefined);
                        env.define(name, value);
                    }
                    self.run_body(&closure, &env).map(|_| ())
                })?;
                Ok(Value::Component(component))
            }
            Value::Closure(closure) => {
                let env = closure.env.child();
                for (name, arg) in closure.params.iter().zip(args.iter()) {
                    env.define(name, arg.0.clone());
                }
                for name in closure.params.iter().skip(args.len()) {
                    env.define(name, Value::Undefined);
                }
                self.run_body(&closure, &env)
            }
            Value::Method(handle, method) => self.call_handle_method(&handle, method, args, span),
            other => Err(self.fail(span, format!("a {} is not callable", other.type_name()))),
        }
    }

    fn run_body(&self, closure: &Closure<'p>, env: &Env<'p>) -> Result<Value<'p>, BuildError> {
        if closure.is_expression {
            // Concise arrow body: its single expression statement is the result.
            if let Some(Statement::ExpressionStatement(stmt)) = closure.body.statements.first() {
                return self.eval_expression(&stmt.expression, env);
            }
        }
        match self.exec_statements(&closure.body.statements, env)? {
            Flow::Return(value) => Ok(value),
            Flow::Normal => Ok(Value::Undefined),
        }
    }

    fn call_handle_method(
        &self,
        handle: &RegistrationHandle,
        method: HandleMethod,
        args: &[(Value<'p>, Span)],
        span: Span,
    ) -> Result<Value<'p>, BuildError> {
        match method {
            HandleMethod::Implement => {
                let Some((Value::Component(component), _)) = args.first() else {
                    return Err(self.fail(span, "implement() expects a component"));
                };
                handle.implement(component)?;
                Ok(Value::Undefined)
            }
            HandleMethod::Script => {
                let Some((Value::Closure(closure), _)) = args.first() else {
                    return Err(self.fail(span, "script() expects a callback function"));
                };
                let opts = self.register_options(args.get(1))?;
                let source = &self.source[closure.span.start as usize..closure.span.end as usize];
                let accepted = handle.script(source, &opts)?;
                Ok(Value::Data(serde_json::Value::Bool(accepted)))
            }
            HandleMethod::Kind(ArtifactKind::Raw) => {
                let Some((Value::Data(serde_json::Value::String(content)), _)) = args.first()
                else {
                    return Err(self.fail(span, "raw() expects pre-serialized text content"));
                };
                let opts = self.register_options(args.get(1))?;
                let (Some(root_dir), Some(ext)) = (opts.root_dir.clone(), opts.ext.clone()) else {
                    return Err(
                        self.fail(span, "raw() requires explicit rootDir and ext options")
                    );
                };
                let name = handle.register_raw(content, &root_dir, &ext, &opts)?;
                Ok(registration_result(name))
            }
            HandleMethod::Kind(kind) => {
                let Some((payload, payload_span)) = args.first() else {
                    return Err(self.fail(
                        span,
                        format!("{}() expects a content payload", kind.handle_name()),
                    ));
                };
                let payload = self.to_data(payload.clone(), *payload_span)?;
                let opts = self.register_options(args.get(1))?;
                let name = handle.register(kind, &payload, &opts)?;
                Ok(registration_result(name))
            }
        }
    }

    fn register_options(
        &self,
        arg: Option<&(Value<'p>, Span)>,
    ) -> Result<RegisterOptions, BuildError> {
        match arg {
            None => Ok(RegisterOptions::default()),
            Some((value, span)) => {
                let data = self.to_data(value.clone(), *span)?;
                serde_json::from_value(data)
                    .map_err(|e| self.fail(*span, format!("invalid registration options: {}", e)))
            }
        }
    }

    fn to_data(&self, value: Value<'p>, span: Span) -> Result<serde_json::Value, BuildError> {
        match value {
            Value::Data(data) => Ok(data),
            other => Err(self.fail(
                span,
                format!("a {} is not serializable data", other.type_name()),
            )),
        }
    }
}

fn registration_result<'p>(name: Option<String>) -> Value<'p> {
    match name {
        Some(name) => Value::Data(serde_json::Value::String(name)),
        None => Value::Data(serde_json::Value::Bool(false)),
    }
}

fn number(value: f64) -> serde_json::Value {
    // Whole numbers serialize as integers so generated JSON reads `20`,
    // not `20.0`.
    if value.fract() == 0.0 && value.abs() < 9e15 {
        serde_json::Value::Number(serde_json::Number::from(value as i64))
    } else {
        serde_json::Number::from_f64(value)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }
}

fn display_number(n: &serde_json::Number) -> String {
    let value = n.as_f64().unwrap_or(0.0);
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENTRY POINT
// ═══════════════════════════════════════════════════════════════════════════════

/// Evaluate partitioned build text inside a fresh isolated context and return
/// the established addon root's file artifacts. Deferred script callbacks are
/// intentionally discarded here; they exist only for the run-time phase.
pub fn collect_file_artifacts(build_text: &str) -> Result<Vec<FileArtifact>, BuildError> {
    let session = Session::new();
    let allocator = Allocator::default();
    let source_type = SourceType::default().with_module(true);
    let ret = Parser::new(&allocator, build_text, source_type).parse();
    if !ret.errors.is_empty() {
        return Err(BuildError::Parse {
            path: "<bundle>".to_string(),
            message: ret
                .errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; "),
        });
    }

    let evaluator = Evaluator {
        source: build_text,
        session: session.clone(),
    };
    let env = Env::root();
    env.define("defineComponentFactory", Value::HostDefine);
    env.define("establishAddon", Value::HostEstablish);

    evaluator.run_program(&ret.program, &env)?;

    match session.take_root() {
        Some(root) => {
            let artifacts = root.into_artifacts();
            log::debug!("sandbox evaluation produced {} artifact(s)", artifacts.len());
            Ok(artifacts)
        }
        None => Err(BuildError::NoAddon),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_addon_produces_artifacts() {
        let artifacts = collect_file_artifacts(
            r#"
            const base = defineComponentFactory((c) => {
                c.entity({ identifier: "demo:base" }, { name: "base" });
            });
            establishAddon(base());
            "#,
        )
        .unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].path, "data/entities/base.json");
        assert!(artifacts[0].content.contains("demo:base"));
    }

    #[test]
    fn test_factory_args_flow_through() {
        let artifacts = collect_file_artifacts(
            r#"
            const mob = defineComponentFactory((c, id, health) => {
                c.entity({ identifier: id, health: health }, { name: id });
            });
            establishAddon(mob("zombie", 20));
            "#,
        )
        .unwrap();
        assert_eq!(artifacts[0].path, "data/entities/zombie.json");
        assert!(artifacts[0].content.contains("\"health\": 20"));
    }

    #[test]
    fn test_implement_composes_in_front() {
        let artifacts = collect_file_artifacts(
            r#"
            const base = defineComponentFactory((c) => {
                c.recipe({ result: "base" }, { name: "base" });
            });
            const child = defineComponentFactory((c) => {
                c.implement(base());
                c.recipe({ result: "child" }, { name: "child" });
            });
            establishAddon(child());
            "#,
        )
        .unwrap();
        let paths: Vec<_> = artifacts.iter().map(|a| a.path.as_str()).collect();
        assert_eq!(paths, vec!["data/recipes/base.json", "data/recipes/child.json"]);
    }

    #[test]
    fn test_once_key_collision_across_factories() {
        // F1 claims "k"; F2 implements F1's component and re-registers the
        // same key, which must be dropped.
        let artifacts = collect_file_artifacts(
            r#"
            const f1 = defineComponentFactory((c) => {
                c.entity({ owner: "f1" }, { once: { key: "k" } });
            });
            const c1 = f1();
            const f2 = defineComponentFactory((c) => {
                c.implement(c1);
                c.entity({ owner: "f2" }, { once: { key: "k" } });
            });
            establishAddon(f2());
            "#,
        )
        .unwrap();
        assert_eq!(artifacts.len(), 1);
        assert!(artifacts[0].content.contains("f1"));
    }

    #[test]
    fn test_script_callbacks_are_captured_not_executed() {
        // The callback body references an identifier that would fail to
        // resolve if it were evaluated.
        let artifacts = collect_file_artifacts(
            r#"
            const root = defineComponentFactory((c) => {
                c.script((modules) => modules.core.start());
                c.item({ identifier: "demo:tool" });
            });
            establishAddon(root());
            "#,
        )
        .unwrap();
        assert_eq!(artifacts.len(), 1);
    }

    #[test]
    fn test_no_establish_is_an_error() {
        let err = collect_file_artifacts("const x = defineComponentFactory((c) => {});")
            .unwrap_err();
        assert!(matches!(err, BuildError::NoAddon));
    }

    #[test]
    fn test_double_establish_propagates_protocol_error() {
        let err = collect_file_artifacts(
            r#"
            const f = defineComponentFactory((c) => {});
            establishAddon(f());
            establishAddon(f());
            "#,
        )
        .unwrap_err();
        match err {
            BuildError::Protocol(p) => assert_eq!(p.code, crate::error::ERR_DOUBLE_ESTABLISH),
            other => panic!("expected protocol error, got {:?}", other),
        }
    }

    #[test]
    fn test_stashed_handle_fails_loudly() {
        let err = collect_file_artifacts(
            r#"
            let stashed;
            const f = defineComponentFactory((c) => { stashed = c; });
            const root = f();
            stashed.entity({ late: true });
            establishAddon(root);
            "#,
        )
        .unwrap_err();
        match err {
            BuildError::Protocol(p) => assert_eq!(p.code, crate::error::ERR_HANDLE_INERT),
            other => panic!("expected protocol error, got {:?}", other),
        }
    }

    #[test]
    fn test_elided_placeholder_evaluates_to_undefined() {
        // partition_source rewrites marker expressions to `undefined`; the
        // evaluator must accept the placeholder wherever it lands.
        let artifacts = collect_file_artifacts(
            r#"
            const handle = undefined;
            const root = defineComponentFactory((c) => {
                c.script(() => undefined);
                c.block({ identifier: "demo:ore" }, { name: "ore" });
            });
            establishAddon(root());
            "#,
        )
        .unwrap();
        assert_eq!(artifacts[0].path, "data/blocks/ore.json");
    }

    #[test]
    fn test_template_and_concatenation() {
        let artifacts = collect_file_artifacts(
            r#"
            const ns = "demo";
            const make = defineComponentFactory((c, kind) => {
                c.entity({ identifier: `${ns}:` + kind }, { name: ns + "_" + kind });
            });
            establishAddon(make("golem"));
            "#,
        )
        .unwrap();
        assert_eq!(artifacts[0].path, "data/entities/demo_golem.json");
        assert!(artifacts[0].content.contains("demo:golem"));
    }

    #[test]
    fn test_unknown_identifier_is_strict_error() {
        let err = collect_file_artifacts("establishAddon(missingFactory());").unwrap_err();
        match err {
            BuildError::Eval(message) => assert!(message.contains("missingFactory")),
            other => panic!("expected eval error, got {:?}", other),
        }
    }

    #[test]
    fn test_raw_registration_from_script() {
        let artifacts = collect_file_artifacts(
            r#"
            const root = defineComponentFactory((c) => {
                c.raw("tick demo", { rootDir: "data/functions", ext: "mcfunction", name: "tick" });
            });
            establishAddon(root());
            "#,
        )
        .unwrap();
        assert_eq!(artifacts[0].path, "data/functions/tick.mcfunction");
        assert_eq!(artifacts[0].content, "tick demo");
    }
}
