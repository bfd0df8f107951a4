//! Finding a path from a leaf through peer-supplied intermediates to a
//! trust anchor.
//!
//! The search is depth-first with backtracking. Certificates are parsed
//! once per search, roots only when first needed as an issuer. The total
//! number of signature checks is capped: a peer can send many CA
//! certificates sharing one name and key, each of which verifies every
//! other, and without the cap the number of orderings tried grows
//! exponentially with the chain depth.

use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

use crate::certificate::Certificate;
use crate::trust_store::TrustStore;

/// Signature checks allowed for one search, as in webpki.
pub(crate) const MAX_SIGNATURE_CHECKS: usize = 100;

#[derive(Clone, Copy)]
enum Node {
    Leaf,
    Intermediate(usize),
    Root(usize),
}

fn parse(cert: &Certificate) -> Option<X509Certificate<'_>> {
    X509Certificate::from_der(cert.der().as_ref())
        .ok()
        .map(|(_, parsed)| parsed)
}

/// Whether `ca` may issue a certificate with `below` intermediates
/// between it and the leaf.
pub(crate) fn allows_depth(ca: &Certificate, below: usize) -> bool {
    ca.path_len_constraint()
        .is_none_or(|max| below <= max as usize)
}

pub(crate) struct PathSearch<'a> {
    leaf: (&'a Certificate, Option<X509Certificate<'a>>),
    intermediates: Vec<(&'a Certificate, Option<X509Certificate<'a>>)>,
    roots: &'a [Certificate],
    parsed_roots: Vec<Option<Option<X509Certificate<'a>>>>,
    used: Vec<bool>,
    max_depth: usize,
    checks_left: usize,
}

impl<'a> PathSearch<'a> {
    pub(crate) fn new(
        roots: &'a TrustStore,
        leaf: &'a Certificate,
        intermediates: &'a [Certificate],
        max_depth: usize,
    ) -> Self {
        let roots = roots.as_slice();
        Self {
            leaf: (leaf, parse(leaf)),
            intermediates: intermediates.iter().map(|c| (c, parse(c))).collect(),
            roots,
            parsed_roots: roots.iter().map(|_| None).collect(),
            used: vec![false; intermediates.len()],
            max_depth,
            checks_left: MAX_SIGNATURE_CHECKS,
        }
    }

    /// Signature checks done so far.
    pub(crate) fn signature_checks(&self) -> usize {
        MAX_SIGNATURE_CHECKS - self.checks_left
    }

    /// The path, leaf first and trust anchor last, if there is one within
    /// the depth limit and the signature check budget.
    pub(crate) fn find(&mut self) -> Option<Vec<&'a Certificate>> {
        let mut path = vec![Node::Leaf];
        if self.extend(&mut path) {
            return Some(path.into_iter().map(|n| self.cert(n)).collect());
        }
        if self.checks_left == 0 {
            log::debug!(
                "Gave up building a path for {} after {} signature checks",
                self.leaf.0.subject(),
                MAX_SIGNATURE_CHECKS
            );
        }
        None
    }

    fn cert(&self, node: Node) -> &'a Certificate {
        match node {
            Node::Leaf => self.leaf.0,
            Node::Intermediate(i) => self.intermediates[i].0,
            Node::Root(i) => {
                let roots = self.roots;
                &roots[i]
            }
        }
    }

    fn parsed(&self, node: Node) -> Option<&X509Certificate<'a>> {
        match node {
            Node::Leaf => self.leaf.1.as_ref(),
            Node::Intermediate(i) => self.intermediates[i].1.as_ref(),
            Node::Root(i) => self.parsed_roots[i].as_ref().and_then(Option::as_ref),
        }
    }

    // Consumes one unit of the budget, even when the check fails.
    fn verifies(&mut self, subject: Node, issuer: Node) -> bool {
        if self.checks_left == 0 {
            return false;
        }
        self.checks_left -= 1;
        if let Node::Root(i) = issuer {
            if self.parsed_roots[i].is_none() {
                let roots = self.roots;
                self.parsed_roots[i] = Some(parse(&roots[i]));
            }
        }
        match (self.parsed(subject), self.parsed(issuer)) {
            (Some(subject), Some(issuer)) => subject
                .verify_signature(Some(issuer.public_key()))
                .is_ok(),
            _ => false,
        }
    }

    fn extend(&mut self, path: &mut Vec<Node>) -> bool {
        let current = path[path.len() - 1];
        let cert = self.cert(current);
        if self.roots.iter().any(|root| root == cert) {
            return true;
        }
        if path.len() >= self.max_depth {
            return false;
        }
        // intermediates between the next issuer and the leaf
        let below = path.len() - 1;
        let roots = self.roots;
        for (i, root) in roots.iter().enumerate() {
            if root.subject_raw() != cert.issuer_raw() || !allows_depth(root, below) {
                continue;
            }
            if self.verifies(current, Node::Root(i)) {
                path.push(Node::Root(i));
                return true;
            }
            if self.checks_left == 0 {
                return false;
            }
        }
        if path.len() + 1 >= self.max_depth {
            return false;
        }
        for i in 0..self.intermediates.len() {
            let candidate = self.intermediates[i].0;
            if self.used[i]
                || !candidate.is_ca()
                || candidate.subject_raw() != cert.issuer_raw()
                || !allows_depth(candidate, below)
            {
                continue;
            }
            if !self.verifies(current, Node::Intermediate(i)) {
                if self.checks_left == 0 {
                    return false;
                }
                continue;
            }
            self.used[i] = true;
            path.push(Node::Intermediate(i));
            if self.extend(path) {
                return true;
            }
            path.pop();
            self.used[i] = false;
            if self.checks_left == 0 {
                return false;
            }
        }
        false
    }
}
