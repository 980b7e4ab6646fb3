//! Menu tree assembly.

use std::collections::{BTreeMap, HashSet};

use super::models::{Menu, MenuId, MenuNode};

/// Build a forest from a flat set of menus.
///
/// A menu whose parent is not part of `menus` is promoted to a root, so
/// pruned sets keep every permitted node reachable. Siblings are ordered by
/// `(sort, id)`. Members of a parent cycle are promoted rather than dropped.
pub fn build_menu_tree(menus: Vec<Menu>) -> Vec<MenuNode> {
    let ids: HashSet<MenuId> = menus.iter().map(|m| m.id).collect();

    let mut roots = Vec::new();
    let mut children: BTreeMap<MenuId, Vec<Menu>> = BTreeMap::new();
    for menu in menus {
        match menu.parent_id {
            Some(parent) if parent != menu.id && ids.contains(&parent) => {
                children.entry(parent).or_default().push(menu)
            }
            _ => roots.push(menu),
        }
    }

    let mut placed = HashSet::new();
    let mut forest = attach(roots, &mut children, &mut placed);

    // Whatever is left hangs off a cycle that never reached a root.
    while let Some(&parent) = children.keys().next() {
        let orphans = children.remove(&parent).unwrap_or_default();
        let promoted: Vec<Menu> = orphans
            .into_iter()
            .filter(|m| !placed.contains(&m.id))
            .collect();
        forest.extend(attach(promoted, &mut children, &mut placed));
    }

    sort_nodes(&mut forest);
    forest
}

fn attach(
    level: Vec<Menu>,
    children: &mut BTreeMap<MenuId, Vec<Menu>>,
    placed: &mut HashSet<MenuId>,
) -> Vec<MenuNode> {
    let mut nodes = Vec::with_capacity(level.len());
    for menu in level {
        if !placed.insert(menu.id) {
            continue;
        }
        let kids = children.remove(&menu.id).unwrap_or_default();
        let mut kids = attach(kids, children, placed);
        sort_nodes(&mut kids);
        nodes.push(MenuNode {
            menu,
            children: kids,
        });
    }
    nodes
}

fn sort_nodes(nodes: &mut [MenuNode]) {
    nodes.sort_by_key(|n| (n.menu.sort, n.menu.id));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn menu(id: MenuId, parent_id: Option<MenuId>, sort: i32) -> Menu {
        Menu {
            id,
            name: format!("m{}", id),
            path: format!("/m{}", id),
            sort,
            visible: true,
            is_system: false,
            tenant_id: None,
            parent_id,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_nested_tree() {
        let tree = build_menu_tree(vec![menu(1, None, 0), menu(2, Some(1), 0), menu(3, Some(2), 0)]);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].children[0].children[0].menu.id, 3);
    }

    #[test]
    fn test_orphans_promoted() {
        let tree = build_menu_tree(vec![menu(2, Some(1), 0), menu(3, Some(2), 0)]);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].menu.id, 2);
        assert_eq!(tree[0].children[0].menu.id, 3);
    }

    #[test]
    fn test_sibling_order() {
        let tree = build_menu_tree(vec![menu(5, None, 2), menu(4, None, 1), menu(3, None, 1)]);
        let ids: Vec<_> = tree.iter().map(|n| n.menu.id).collect();
        assert_eq!(ids, vec![3, 4, 5]);
    }

    #[test]
    fn test_cycle_kept() {
        let tree = build_menu_tree(vec![menu(1, Some(2), 0), menu(2, Some(1), 0)]);
        let mut ids: Vec<_> = tree.iter().flat_map(|n| n.ids()).collect();
        ids.sort();
        assert_eq!(ids, vec![1, 2]);
    }
}
