//! Ambient markers pushed onto a creational context during nested creation.

use crate::contextual::ContextualId;

/// The injection point currently being satisfied.
///
/// # Examples
///
/// ```rust
/// use ferrous_cdi::{ContextualId, InjectionPoint};
///
/// let ip = InjectionPoint::new("OrderService::payments")
///     .with_bean(ContextualId::new("order-service"))
///     .with_qualifier("Default");
/// assert_eq!(ip.bean.as_ref().map(|b| b.as_str()), Some("order-service"));
/// assert!(!ip.delegate);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectionPoint {
    /// Bean declaring the injection point, if any
    pub bean: Option<ContextualId>,
    /// Field, parameter or setter being injected
    pub member: String,
    pub qualifiers: Vec<String>,
    /// Decorator delegate injection point
    pub delegate: bool,
}

impl InjectionPoint {
    pub fn new(member: impl Into<String>) -> Self {
        Self {
            bean: None,
            member: member.into(),
            qualifiers: Vec::new(),
            delegate: false,
        }
    }

    pub fn with_bean(mut self, bean: ContextualId) -> Self {
        self.bean = Some(bean);
        self
    }

    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifiers.push(qualifier.into());
        self
    }

    pub fn as_delegate(mut self) -> Self {
        self.delegate = true;
        self
    }
}

/// The event being delivered while an observer's dependents are created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventMetadata {
    pub event_type: String,
    pub qualifiers: Vec<String>,
    /// Injection point of the `Event` handle that fired it
    pub injection_point: Option<InjectionPoint>,
}

impl EventMetadata {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            qualifiers: Vec::new(),
            injection_point: None,
        }
    }

    pub fn of<E: ?Sized + 'static>() -> Self {
        Self::new(std::any::type_name::<E>())
    }

    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifiers.push(qualifier.into());
        self
    }

    pub fn with_injection_point(mut self, injection_point: InjectionPoint) -> Self {
        self.injection_point = Some(injection_point);
        self
    }
}
