use crate::settings::Images;
use serde::Serialize;
use std::collections::BTreeMap;

pub const PROXY_NETWORK: &str = "nginx-proxy";
pub const DB_NETWORK: &str = "db-network";
pub const SITE_NETWORK: &str = "site-network";

pub const PROXY_CONTAINER: &str = "nginx-proxy";
pub const DB_CONTAINER: &str = "mariadb";

#[derive(Debug, Serialize, Default, Clone, PartialEq)]
pub struct ComposeFile {
    /// Top-level project name; compose otherwise derives it from the folder.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub version: String,
    pub services: BTreeMap<String, ComposeService>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub networks: BTreeMap<String, ComposeNetwork>,
}

#[derive(Debug, Serialize, Default, Clone, PartialEq)]
pub struct ComposeService {
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub env_file: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub environment: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<String>,
}

#[derive(Debug, Serialize, Default, Clone, PartialEq)]
pub struct ComposeNetwork {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub external: bool,
}

impl ComposeNetwork {
    fn named(name: &str) -> Self {
        ComposeNetwork {
            name: Some(name.to_string()),
            external: false,
        }
    }

    fn external(name: &str) -> Self {
        ComposeNetwork {
            name: Some(name.to_string()),
            external: true,
        }
    }
}

impl ComposeFile {
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| (*item).to_string()).collect()
}

/// Per-site stack: nginx always, php plus database wiring when `php_tag` is set.
pub fn site_stack(images: &Images, project: &str, php_tag: Option<&str>) -> ComposeFile {
    let mut stack = ComposeFile {
        name: Some(project.to_string()),
        version: "3".to_string(),
        ..ComposeFile::default()
    };

    let mut nginx = ComposeService {
        image: images.nginx.clone(),
        restart: Some("always".to_string()),
        environment: strings(&["VIRTUAL_HOST=${VHOST_NAME}"]),
        volumes: strings(&[
            "./app:/var/www/html",
            "./conf/nginx/common:/etc/nginx/common",
            "./conf/nginx/default.conf:/etc/nginx/conf.d/default.conf",
            "./conf/nginx/nginx.conf:/etc/nginx/nginx.conf",
            "./data/logs/nginx:/var/log/nginx",
            "./data/nginx-cache:/var/run/nginx-cache",
        ]),
        networks: strings(&[SITE_NETWORK, PROXY_NETWORK]),
        ..ComposeService::default()
    };

    stack
        .networks
        .insert(SITE_NETWORK.to_string(), ComposeNetwork::named("${VHOST_NAME}"));
    stack
        .networks
        .insert(PROXY_NETWORK.to_string(), ComposeNetwork::external(PROXY_NETWORK));

    if let Some(tag) = php_tag {
        let php = ComposeService {
            image: format!("{}:{}", images.php, tag),
            restart: Some("always".to_string()),
            env_file: strings(&[".env"]),
            volumes: strings(&["./app:/var/www/html"]),
            networks: strings(&[SITE_NETWORK, DB_NETWORK]),
            ..ComposeService::default()
        };
        nginx.depends_on = strings(&["php"]);
        stack.services.insert("php".to_string(), php);
        stack
            .networks
            .insert(DB_NETWORK.to_string(), ComposeNetwork::external(DB_NETWORK));
    }

    stack.services.insert("nginx".to_string(), nginx);
    stack
}

/// Shared services: the reverse proxy and the database server.
pub fn global_stack(images: &Images) -> ComposeFile {
    let mut stack = ComposeFile {
        version: "3".to_string(),
        ..ComposeFile::default()
    };
    stack.services.insert(
        "nginx-proxy".to_string(),
        ComposeService {
            image: images.proxy.clone(),
            container_name: Some(PROXY_CONTAINER.to_string()),
            restart: Some("always".to_string()),
            ports: strings(&["80:80", "443:443"]),
            volumes: strings(&[
                "./nginx/certs:/etc/nginx/certs",
                "./nginx/dhparam:/etc/nginx/dhparam",
                "./nginx/conf.d:/etc/nginx/conf.d",
                "./nginx/htpasswd:/etc/nginx/htpasswd",
                "./nginx/vhost.d:/etc/nginx/vhost.d",
                "/var/run/docker.sock:/tmp/docker.sock:ro",
            ]),
            networks: strings(&[PROXY_NETWORK]),
            ..ComposeService::default()
        },
    );
    stack.services.insert(
        "mariadb".to_string(),
        ComposeService {
            image: images.database.clone(),
            container_name: Some(DB_CONTAINER.to_string()),
            restart: Some("always".to_string()),
            ports: strings(&["3306:3306"]),
            environment: strings(&["MYSQL_ROOT_PASSWORD=${MYSQL_ROOT_PASSWORD}"]),
            volumes: strings(&["./data/mysql:/var/lib/mysql"]),
            networks: strings(&[DB_NETWORK]),
            ..ComposeService::default()
        },
    );
    stack
        .networks
        .insert(PROXY_NETWORK.to_string(), ComposeNetwork::external(PROXY_NETWORK));
    stack
        .networks
        .insert(DB_NETWORK.to_string(), ComposeNetwork::external(DB_NETWORK));
    stack
}
