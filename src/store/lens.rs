//! Lens - composable read/write paths into a store's value
//!
//! A lens is an optic (`view` + `replace`) rooted at a [`Store`]. Writing
//! through a lens of any depth rebuilds only the nodes along its path and
//! issues exactly one `set()` on the root, under the root row lock.

use std::fmt;
use std::sync::Arc;

use crate::error::{Result, TesseraError};
use crate::session::Session;
use crate::util::CallSite;

use super::listeners::Subscription;
use super::node::Structured;
use super::path::{self, PathSegment};
use super::reactive::Store;

/// A read/write focus from `R` to `F`
trait Optic<R, F>: Send + Sync {
    fn view(&self, root: &R) -> Result<F>;
    fn replace(&self, root: &R, value: F) -> Result<R>;
}

struct Identity;

impl<R: Clone> Optic<R, R> for Identity {
    fn view(&self, root: &R) -> Result<R> {
        Ok(root.clone())
    }

    fn replace(&self, _root: &R, value: R) -> Result<R> {
        Ok(value)
    }
}

/// One field or index step on a `Structured` value
struct Step {
    segment: PathSegment,
    path: String,
}

impl Step {
    fn traversal_error<V: Structured>(&self, value: &V) -> TesseraError {
        TesseraError::InvalidTraversal {
            segment: self.segment.to_string(),
            value_type: value.kind().to_string(),
            path: self.path.clone(),
        }
    }

    fn not_found(&self) -> TesseraError {
        TesseraError::PathNotFound {
            path: self.path.clone(),
        }
    }
}

impl<V: Structured + Clone + Send + Sync> Optic<V, V> for Step {
    fn view(&self, root: &V) -> Result<V> {
        let child = match &self.segment {
            PathSegment::Field(name) => {
                if !root.is_record() {
                    return Err(self.traversal_error(root));
                }
                root.get_field(name)
            }
            PathSegment::Index(index) => {
                if !root.is_list() {
                    return Err(self.traversal_error(root));
                }
                root.get_index(*index)
            }
        };
        child.cloned().ok_or_else(|| self.not_found())
    }

    fn replace(&self, root: &V, value: V) -> Result<V> {
        match &self.segment {
            PathSegment::Field(name) => {
                if !root.is_record() {
                    return Err(self.traversal_error(root));
                }
                root.with_field(name, value).ok_or_else(|| self.not_found())
            }
            PathSegment::Index(index) => {
                if !root.is_list() {
                    return Err(self.traversal_error(root));
                }
                root.with_index(*index, value).ok_or_else(|| self.not_found())
            }
        }
    }
}

type Getter<M, F> = Arc<dyn Fn(&M) -> F + Send + Sync>;
type Setter<M, F> = Arc<dyn Fn(&M, F) -> M + Send + Sync>;

/// Typed accessor pair for record structs
struct Focus<M, F> {
    get: Getter<M, F>,
    set: Setter<M, F>,
}

impl<M, F> Optic<M, F> for Focus<M, F> {
    fn view(&self, root: &M) -> Result<F> {
        Ok((self.get)(root))
    }

    fn replace(&self, root: &M, value: F) -> Result<M> {
        Ok((self.set)(root, value))
    }
}

struct Compose<R, M, F> {
    outer: Arc<dyn Optic<R, M>>,
    inner: Arc<dyn Optic<M, F>>,
}

impl<R, M, F> Optic<R, F> for Compose<R, M, F> {
    fn view(&self, root: &R) -> Result<F> {
        self.inner.view(&self.outer.view(root)?)
    }

    fn replace(&self, root: &R, value: F) -> Result<R> {
        let middle = self.outer.view(root)?;
        let middle = self.inner.replace(&middle, value)?;
        self.outer.replace(root, middle)
    }
}

/// Read/write path from a root `Store<R>` to a part of type `F`
pub struct Lens<R, F> {
    root: Store<R>,
    optic: Arc<dyn Optic<R, F>>,
    path: Arc<str>,
}

impl<R, F> Clone for Lens<R, F> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            optic: Arc::clone(&self.optic),
            path: Arc::clone(&self.path),
        }
    }
}

impl<R, F> Lens<R, F>
where
    R: Clone + Send + Sync + 'static,
    F: Clone + Send + Sync + 'static,
{
    /// Rendered path, e.g. `cities[0].population`
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn root(&self) -> &Store<R> {
        &self.root
    }

    #[track_caller]
    pub fn get(&self, session: &Session) -> Result<F> {
        let root = self.root.get(session)?;
        self.optic.view(&root)
    }

    #[track_caller]
    pub fn peek(&self, session: &Session) -> Result<F> {
        let root = self.root.peek(session)?;
        self.optic.view(&root)
    }

    /// Replace the focused part; one root `set()` under the root lock
    #[track_caller]
    pub fn set(&self, session: &Session, value: F) -> Result<()> {
        let site = CallSite::here();
        let storage = self.root.storage();
        let mut value = Some(value);
        storage.with_lock(session, &mut || {
            let Some(value) = value.take() else {
                return Ok(());
            };
            let current = storage.peek(session, site)?;
            let next = self.optic.replace(&current, value)?;
            storage.set(session, next, site)
        })
    }

    /// Replace the focused part with `f(current part)`
    #[track_caller]
    pub fn update(&self, session: &Session, f: impl FnOnce(&F) -> F) -> Result<()> {
        let site = CallSite::here();
        let storage = self.root.storage();
        let mut f = Some(f);
        storage.with_lock(session, &mut || {
            let Some(f) = f.take() else {
                return Ok(());
            };
            let current = storage.peek(session, site)?;
            let part = self.optic.view(&current)?;
            let next = self.optic.replace(&current, f(&part))?;
            storage.set(session, next, site)
        })
    }

    /// Call `listener(new part)` when the focused part changes
    ///
    /// Changes after which the path no longer resolves are skipped.
    pub fn subscribe(
        &self,
        session: &Session,
        listener: impl Fn(&F) + Send + Sync + 'static,
    ) -> Result<Subscription>
    where
        F: PartialEq,
    {
        self.subscribe_change(session, move |new, _old| listener(new))
    }

    /// Call `listener(new part, old part)` when the focused part changes
    pub fn subscribe_change(
        &self,
        session: &Session,
        listener: impl Fn(&F, &F) + Send + Sync + 'static,
    ) -> Result<Subscription>
    where
        F: PartialEq,
    {
        let optic = Arc::clone(&self.optic);
        self.root.subscribe_change(session, move |new: &R, old: &R| {
            let (Ok(new), Ok(old)) = (optic.view(new), optic.view(old)) else {
                return;
            };
            if new != old {
                listener(&new, &old);
            }
        })
    }

    /// Narrow this lens with typed accessors
    pub fn focus<G>(
        &self,
        label: &str,
        get: impl Fn(&F) -> G + Send + Sync + 'static,
        set: impl Fn(&F, G) -> F + Send + Sync + 'static,
    ) -> Lens<R, G>
    where
        G: Clone + Send + Sync + 'static,
    {
        let focus: Arc<dyn Optic<F, G>> = Arc::new(Focus {
            get: Arc::new(get),
            set: Arc::new(set),
        });
        self.compose(focus, path::join(&self.path, &PathSegment::Field(label.to_string())))
    }

    fn compose<G>(&self, inner: Arc<dyn Optic<F, G>>, path: String) -> Lens<R, G>
    where
        G: Clone + Send + Sync + 'static,
    {
        Lens {
            root: self.root.clone(),
            optic: Arc::new(Compose {
                outer: Arc::clone(&self.optic),
                inner,
            }),
            path: Arc::from(path),
        }
    }
}

impl<R, F> Lens<R, F>
where
    R: Clone + Send + Sync + 'static,
    F: Structured + Clone + Send + Sync + 'static,
{
    /// Step into record field `name`
    pub fn field(&self, name: &str) -> Lens<R, F> {
        self.step(PathSegment::Field(name.to_string()))
    }

    /// Step into list element `index`
    pub fn index(&self, index: usize) -> Lens<R, F> {
        self.step(PathSegment::Index(index))
    }

    /// Follow a path such as `cities[0].population`
    pub fn at(&self, path: &str) -> Result<Lens<R, F>> {
        Ok(path::parse(path)?
            .into_iter()
            .fold(self.clone(), |lens, segment| lens.step(segment)))
    }

    fn step(&self, segment: PathSegment) -> Lens<R, F> {
        let path = path::join(&self.path, &segment);
        let step: Arc<dyn Optic<F, F>> = Arc::new(Step {
            segment,
            path: path.clone(),
        });
        self.compose(step, path)
    }
}

impl<R, F> fmt::Debug for Lens<R, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lens")
            .field("root", &self.root)
            .field("path", &self.path)
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> Store<T> {
    /// Lens over the whole value
    pub fn lens(&self) -> Lens<T, T> {
        Lens {
            root: self.clone(),
            optic: Arc::new(Identity),
            path: Arc::from("$"),
        }
    }

    /// Lens through typed accessors, e.g. one struct field
    pub fn focus<G>(
        &self,
        label: &str,
        get: impl Fn(&T) -> G + Send + Sync + 'static,
        set: impl Fn(&T, G) -> T + Send + Sync + 'static,
    ) -> Lens<T, G>
    where
        G: Clone + Send + Sync + 'static,
    {
        self.lens().focus(label, get, set)
    }
}

impl<T: Structured + Clone + Send + Sync + 'static> Store<T> {
    pub fn field(&self, name: &str) -> Lens<T, T> {
        self.lens().field(name)
    }

    pub fn index(&self, index: usize) -> Lens<T, T> {
        self.lens().index(index)
    }

    pub fn at(&self, path: &str) -> Result<Lens<T, T>> {
        self.lens().at(path)
    }
}
