//! Dictionary statements, one per access tier.
//!
//! `FULL` statements read the `ALL_*` views scoped by `:owner`. `OWN`
//! statements read the `USER_*` views and report `USER` as the owner.
//! Statements are public so test connections can answer by SQL text.

pub const DISCOVER_ALL: &str = "\
SELECT owner, object_name, object_type
FROM all_objects
WHERE owner = :owner
AND object_type IN ('TABLE', 'VIEW', 'MATERIALIZED VIEW')
ORDER BY object_name";

pub const DISCOVER_USER: &str = "\
SELECT USER AS owner, table_name AS object_name, 'TABLE' AS object_type FROM user_tables
UNION ALL
SELECT USER, view_name, 'VIEW' FROM user_views
UNION ALL
SELECT USER, mview_name, 'MATERIALIZED VIEW' FROM user_mviews
ORDER BY 2";

pub const OBJECT_TYPE_ALL: &str = "\
SELECT object_type
FROM all_objects
WHERE owner = :owner
AND object_name = :name
AND object_type IN ('TABLE', 'VIEW', 'MATERIALIZED VIEW')";

pub const OBJECT_TYPE_USER: &str = "\
SELECT 'TABLE' AS object_type FROM user_tables WHERE table_name = :name
UNION ALL
SELECT 'VIEW' FROM user_views WHERE view_name = :name
UNION ALL
SELECT 'MATERIALIZED VIEW' FROM user_mviews WHERE mview_name = :name";

pub const COLUMNS_ALL: &str = "\
SELECT column_name, data_type, data_length, data_precision, data_scale,
       nullable, column_id, data_default
FROM all_tab_columns
WHERE owner = :owner AND table_name = :name
ORDER BY column_id";

pub const COLUMNS_USER: &str = "\
SELECT column_name, data_type, data_length, data_precision, data_scale,
       nullable, column_id, data_default
FROM user_tab_columns
WHERE table_name = :name
ORDER BY column_id";

pub const TABLE_COMMENT_ALL: &str = "\
SELECT comments FROM all_tab_comments WHERE owner = :owner AND table_name = :name";

pub const TABLE_COMMENT_USER: &str = "\
SELECT comments FROM user_tab_comments WHERE table_name = :name";

pub const COLUMN_COMMENTS_ALL: &str = "\
SELECT column_name, comments
FROM all_col_comments
WHERE owner = :owner AND table_name = :name AND comments IS NOT NULL";

pub const COLUMN_COMMENTS_USER: &str = "\
SELECT column_name, comments
FROM user_col_comments
WHERE table_name = :name AND comments IS NOT NULL";

// Constraint statements return one row per constrained column:
// constraint_name, constraint_type, column_name, position, search_condition, status.
// Foreign keys are read by the relationship statements below.

pub const CONSTRAINTS_ALL: &str = "\
SELECT ac.constraint_name, ac.constraint_type, acc.column_name, acc.position,
       ac.search_condition, ac.status
FROM all_constraints ac
LEFT JOIN all_cons_columns acc ON acc.owner = ac.owner AND acc.constraint_name = ac.constraint_name
WHERE ac.owner = :owner
AND ac.table_name = :name
AND ac.constraint_type IN ('P', 'U', 'C')
ORDER BY ac.constraint_name, acc.position";

pub const CONSTRAINTS_USER: &str = "\
SELECT uc.constraint_name, uc.constraint_type, ucc.column_name, ucc.position,
       uc.search_condition, uc.status
FROM user_constraints uc
LEFT JOIN user_cons_columns ucc ON ucc.constraint_name = uc.constraint_name
WHERE uc.table_name = :name
AND uc.constraint_type IN ('P', 'U', 'C')
ORDER BY uc.constraint_name, ucc.position";

// index_name, uniqueness, column_name, column_position, status, tablespace_name

pub const INDEXES_ALL: &str = "\
SELECT ai.index_name, ai.uniqueness, aic.column_name, aic.column_position,
       ai.status, ai.tablespace_name
FROM all_indexes ai
JOIN all_ind_columns aic ON aic.index_owner = ai.owner AND aic.index_name = ai.index_name
WHERE ai.table_owner = :owner
AND ai.table_name = :name
ORDER BY ai.index_name, aic.column_position";

pub const INDEXES_USER: &str = "\
SELECT ui.index_name, ui.uniqueness, uic.column_name, uic.column_position,
       ui.status, ui.tablespace_name
FROM user_indexes ui
JOIN user_ind_columns uic ON uic.index_name = ui.index_name
WHERE ui.table_name = :name
ORDER BY ui.index_name, uic.column_position";

// Every relationship statement returns the same eight columns:
// constraint_name, owner, table_name, column_name, position,
// r_owner, r_table_name, r_column_name

pub const OUTGOING_FKS_ALL: &str = "\
SELECT ac.constraint_name, ac.owner, ac.table_name, acc.column_name, acc.position,
       rcc.owner, rcc.table_name, rcc.column_name
FROM all_constraints ac
JOIN all_cons_columns acc ON acc.owner = ac.owner AND acc.constraint_name = ac.constraint_name
JOIN all_cons_columns rcc ON rcc.owner = ac.r_owner AND rcc.constraint_name = ac.r_constraint_name
                         AND rcc.position = acc.position
WHERE ac.constraint_type = 'R'
AND ac.owner = :owner
AND ac.table_name = :name
ORDER BY ac.constraint_name, acc.position";

pub const OUTGOING_FKS_USER: &str = "\
SELECT uc.constraint_name, USER, uc.table_name, ucc.column_name, ucc.position,
       uc.r_owner, rcc.table_name, rcc.column_name
FROM user_constraints uc
JOIN user_cons_columns ucc ON ucc.constraint_name = uc.constraint_name
JOIN user_cons_columns rcc ON rcc.constraint_name = uc.r_constraint_name
                          AND rcc.position = ucc.position
WHERE uc.constraint_type = 'R'
AND uc.table_name = :name
ORDER BY uc.constraint_name, ucc.position";

pub const INCOMING_FKS_ALL: &str = "\
SELECT ac.constraint_name, ac.owner, ac.table_name, acc.column_name, acc.position,
       rcc.owner, rcc.table_name, rcc.column_name
FROM all_constraints ac
JOIN all_cons_columns acc ON acc.owner = ac.owner AND acc.constraint_name = ac.constraint_name
JOIN all_cons_columns rcc ON rcc.owner = ac.r_owner AND rcc.constraint_name = ac.r_constraint_name
                         AND rcc.position = acc.position
WHERE ac.constraint_type = 'R'
AND ac.r_owner = :owner
AND rcc.table_name = :name
ORDER BY ac.owner, ac.constraint_name, acc.position";

pub const INCOMING_FKS_USER: &str = "\
SELECT uc.constraint_name, USER, uc.table_name, ucc.column_name, ucc.position,
       uc.r_owner, rcc.table_name, rcc.column_name
FROM user_constraints uc
JOIN user_cons_columns ucc ON ucc.constraint_name = uc.constraint_name
JOIN user_cons_columns rcc ON rcc.constraint_name = uc.r_constraint_name
                          AND rcc.position = ucc.position
WHERE uc.constraint_type = 'R'
AND rcc.table_name = :name
ORDER BY uc.constraint_name, ucc.position";

pub const OWNER_FKS_ALL: &str = "\
SELECT ac.constraint_name, ac.owner, ac.table_name, acc.column_name, acc.position,
       rcc.owner, rcc.table_name, rcc.column_name
FROM all_constraints ac
JOIN all_cons_columns acc ON acc.owner = ac.owner AND acc.constraint_name = ac.constraint_name
JOIN all_cons_columns rcc ON rcc.owner = ac.r_owner AND rcc.constraint_name = ac.r_constraint_name
                         AND rcc.position = acc.position
WHERE ac.constraint_type = 'R'
AND (ac.owner = :owner OR ac.r_owner = :owner)
ORDER BY ac.owner, ac.constraint_name, acc.position";

pub const OWNER_FKS_USER: &str = "\
SELECT uc.constraint_name, USER, uc.table_name, ucc.column_name, ucc.position,
       uc.r_owner, rcc.table_name, rcc.column_name
FROM user_constraints uc
JOIN user_cons_columns ucc ON ucc.constraint_name = uc.constraint_name
JOIN user_cons_columns rcc ON rcc.constraint_name = uc.r_constraint_name
                          AND rcc.position = ucc.position
WHERE uc.constraint_type = 'R'
ORDER BY uc.constraint_name, ucc.position";

pub const VERSION_ALL: &str = "SELECT banner FROM v$version";

pub const VERSION_USER: &str = "\
SELECT product || ' ' || version FROM product_component_version";
