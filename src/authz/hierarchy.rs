use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::AuthzError;

/// Platform roles, highest privilege first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    SuperAdmin,
    GroupAdmin,
    TenantAdmin,
    HrManager,
    DeptManager,
    TeamLeader,
    Employee,
}

impl Role {
    pub const ALL: [Role; 7] = [
        Role::SuperAdmin,
        Role::GroupAdmin,
        Role::TenantAdmin,
        Role::HrManager,
        Role::DeptManager,
        Role::TeamLeader,
        Role::Employee,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "SUPER_ADMIN",
            Role::GroupAdmin => "GROUP_ADMIN",
            Role::TenantAdmin => "TENANT_ADMIN",
            Role::HrManager => "HR_MANAGER",
            Role::DeptManager => "DEPT_MANAGER",
            Role::TeamLeader => "TEAM_LEADER",
            Role::Employee => "EMPLOYEE",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AuthzError;

    /// Accepts both `HR_MANAGER` and the token form `ROLE_HR_MANAGER`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        let name = name.strip_prefix("ROLE_").unwrap_or(name);
        Role::ALL
            .iter()
            .copied()
            .find(|role| role.as_str().eq_ignore_ascii_case(name))
            .ok_or_else(|| AuthzError::UnknownRole(s.to_string()))
    }
}

/// Directed "parent possesses every permission of child" edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleEdge {
    pub parent: Role,
    pub child: Role,
}

/// Validated acyclic role graph with precomputed closures.
///
/// `closure(r)` contains `r` itself plus every role reachable from it.
#[derive(Debug, Clone)]
pub struct RoleHierarchy {
    edges: BTreeMap<Role, BTreeSet<Role>>,
    closures: BTreeMap<Role, BTreeSet<Role>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

impl RoleHierarchy {
    pub fn from_edges(edges: impl IntoIterator<Item = RoleEdge>) -> Result<Self, AuthzError> {
        let mut graph: BTreeMap<Role, BTreeSet<Role>> = BTreeMap::new();
        for edge in edges {
            if edge.parent == edge.child {
                return Err(AuthzError::InvalidHierarchy(format!(
                    "role {} cannot inherit from itself",
                    edge.parent
                )));
            }
            graph.entry(edge.parent).or_default().insert(edge.child);
        }

        Self::check_acyclic(&graph)?;

        let closures = Role::ALL
            .iter()
            .map(|&role| (role, Self::reachable(&graph, role)))
            .collect();

        Ok(Self {
            edges: graph,
            closures,
        })
    }

    /// SUPER_ADMIN > GROUP_ADMIN > TENANT_ADMIN > HR_MANAGER > DEPT_MANAGER > TEAM_LEADER > EMPLOYEE
    pub fn chain(roles: &[Role]) -> Result<Self, AuthzError> {
        Self::from_edges(roles.windows(2).map(|pair| RoleEdge {
            parent: pair[0],
            child: pair[1],
        }))
    }

    pub fn edges(&self) -> impl Iterator<Item = RoleEdge> + '_ {
        self.edges.iter().flat_map(|(&parent, children)| {
            children.iter().map(move |&child| RoleEdge { parent, child })
        })
    }

    pub fn closure_of(&self, role: Role) -> &BTreeSet<Role> {
        // Every role has an entry, built in from_edges
        &self.closures[&role]
    }

    /// Union of closures for a caller's role set
    pub fn closure<'a>(&self, roles: impl IntoIterator<Item = &'a Role>) -> BTreeSet<Role> {
        roles
            .into_iter()
            .flat_map(|role| self.closure_of(*role).iter().copied())
            .collect()
    }

    /// True if `held` (or something it inherits) includes `required`
    pub fn satisfies(&self, held: &BTreeSet<Role>, required: Role) -> bool {
        held.iter().any(|role| self.closure_of(*role).contains(&required))
    }

    /// True if some held role sits strictly above `role`
    pub fn dominates(&self, held: &BTreeSet<Role>, role: Role) -> bool {
        held.iter()
            .any(|&h| h != role && self.closure_of(h).contains(&role))
    }

    fn reachable(graph: &BTreeMap<Role, BTreeSet<Role>>, start: Role) -> BTreeSet<Role> {
        let mut seen = BTreeSet::from([start]);
        let mut stack = vec![start];
        while let Some(role) = stack.pop() {
            if let Some(children) = graph.get(&role) {
                for &child in children {
                    if seen.insert(child) {
                        stack.push(child);
                    }
                }
            }
        }
        seen
    }

    fn check_acyclic(graph: &BTreeMap<Role, BTreeSet<Role>>) -> Result<(), AuthzError> {
        let mut marks: BTreeMap<Role, Mark> = BTreeMap::new();
        let mut path = Vec::new();
        for &role in graph.keys() {
            Self::visit(graph, role, &mut marks, &mut path)?;
        }
        Ok(())
    }

    fn visit(
        graph: &BTreeMap<Role, BTreeSet<Role>>,
        role: Role,
        marks: &mut BTreeMap<Role, Mark>,
        path: &mut Vec<Role>,
    ) -> Result<(), AuthzError> {
        match marks.get(&role) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = path.iter().position(|r| *r == role).unwrap_or(0);
                let cycle: Vec<String> = path[start..]
                    .iter()
                    .chain(std::iter::once(&role))
                    .map(|r| r.to_string())
                    .collect();
                return Err(AuthzError::InvalidHierarchy(format!(
                    "cycle detected: {}",
                    cycle.join(" > ")
                )));
            }
            None => {}
        }

        marks.insert(role, Mark::Visiting);
        path.push(role);
        if let Some(children) = graph.get(&role) {
            for &child in children {
                Self::visit(graph, child, marks, path)?;
            }
        }
        path.pop();
        marks.insert(role, Mark::Done);
        Ok(())
    }
}

/// The chain over `Role::ALL`: each role's closure is itself and every role after it
impl Default for RoleHierarchy {
    fn default() -> Self {
        let edges = Role::ALL
            .windows(2)
            .map(|pair| (pair[0], BTreeSet::from([pair[1]])))
            .collect();
        let closures = Role::ALL
            .iter()
            .enumerate()
            .map(|(idx, &role)| (role, Role::ALL[idx..].iter().copied().collect()))
            .collect();
        Self { edges, closures }
    }
}
